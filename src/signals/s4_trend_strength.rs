//! S4 -- Trend Strength.
//!
//! 60-day regression slope of the close, z-scored against its own 252-day
//! distribution, cross-referenced with the 200-day SMA side.

use crate::indicators::{last, lin_reg_slope, sma, zscore};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S4TrendStrength;

const WEIGHT: f64 = 0.10;
const SLOPE_WINDOW: usize = 60;
const Z_LOOKBACK: usize = 252;
const Z_EXTREME: f64 = 1.5;
const Z_MODERATE: f64 = 0.5;

impl SubStrategy for S4TrendStrength {
    fn name(&self) -> &'static str {
        "S4_TrendStrength"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let slope = lin_reg_slope(closes, SLOPE_WINDOW);
        let slope_z = last(&zscore(&slope, Z_LOOKBACK));
        let sma200 = last(&sma(closes, 200));
        let close = last(closes);

        let (raw_score, strength) = match (close, sma200, slope_z) {
            (Some(c), Some(ma), Some(z)) => {
                let above_200 = c > ma;
                if z >= Z_EXTREME && above_200 {
                    (1.0, SignalStrength::StrongBull)
                } else if z >= Z_MODERATE && above_200 {
                    (0.5, SignalStrength::Bull)
                } else if z <= -Z_EXTREME && !above_200 {
                    (-0.5, SignalStrength::StrongBear)
                } else if z <= -Z_MODERATE {
                    (-0.2, SignalStrength::Bear)
                } else {
                    (0.0, SignalStrength::Neutral)
                }
            }
            _ => (0.0, SignalStrength::Neutral),
        };

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("slope", last(&slope).unwrap_or(f64::NAN))
            .with_diagnostic("slope_z", slope_z.unwrap_or(f64::NAN))
            .with_diagnostic("sma200", sma200.unwrap_or(f64::NAN))
    }
}
