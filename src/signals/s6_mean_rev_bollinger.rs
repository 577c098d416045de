//! S6 -- Bollinger Mean Reversion.
//!
//! 20-day Bollinger %B for overbought/oversold readings, filtered by the
//! 200-day SMA macro trend. An extreme washout is a tactical bounce trade
//! regardless of trend.

use crate::indicators::{bollinger_pct_b, last, sma};
use crate::signals::{Signal, SignalStrength, SubStrategy};

pub struct S6MeanRevBollinger;

const WEIGHT: f64 = 0.15;

impl SubStrategy for S6MeanRevBollinger {
    fn name(&self) -> &'static str {
        "S6_MeanRevBollinger"
    }

    fn weight(&self) -> f64 {
        WEIGHT
    }

    fn evaluate(&self, closes: &[f64]) -> Signal {
        let pct_b = last(&bollinger_pct_b(closes, 20, 2.0));
        let sma200 = last(&sma(closes, 200));
        let close = last(closes);

        let (raw_score, strength) = match (close, sma200, pct_b) {
            (Some(c), Some(ma), Some(b)) => {
                let macro_bullish = c > ma;
                if b < 0.05 {
                    // Extreme washout: tactical bounce regardless of trend.
                    (0.8, SignalStrength::Bull)
                } else if b < 0.2 && macro_bullish {
                    (1.0, SignalStrength::StrongBull)
                } else if b < 0.2 {
                    // Oversold in a bear trend: don't catch the knife.
                    (0.0, SignalStrength::Neutral)
                } else if (0.2..=0.5).contains(&b) && !macro_bullish {
                    (-0.5, SignalStrength::Bear)
                } else if (0.3..=0.8).contains(&b) && macro_bullish {
                    (0.8, SignalStrength::Bull)
                } else if b > 0.95 && macro_bullish {
                    (0.3, SignalStrength::Bull)
                } else if b > 0.95 {
                    (-0.3, SignalStrength::Bear)
                } else {
                    (0.0, SignalStrength::Neutral)
                }
            }
            _ => (0.0, SignalStrength::Neutral),
        };

        Signal::new(self.name(), strength, WEIGHT, raw_score)
            .with_diagnostic("pct_b", pct_b.unwrap_or(f64::NAN))
            .with_diagnostic("sma200", sma200.unwrap_or(f64::NAN))
    }
}
