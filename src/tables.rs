//! Lookup tables for the logistic function and the natural log.

use crate::real;

const SIGMOID_TABLE_SIZE: usize = 512;
const MAX_SIGMOID: real = 8.0;
const LOG_TABLE_SIZE: usize = 512;

pub(crate) struct Tables {
    sigmoid: Vec<real>,
    log: Vec<real>,
}

impl Tables {
    pub fn new() -> Self {
        let sigmoid = (0..=SIGMOID_TABLE_SIZE)
            .map(|i| {
                let x = (i as real * 2.0 * MAX_SIGMOID) / SIGMOID_TABLE_SIZE as real - MAX_SIGMOID;
                1.0 / (1.0 + (-x).exp())
            })
            .collect();
        let log = (0..=LOG_TABLE_SIZE)
            .map(|i| ((i as real + 1e-5) / LOG_TABLE_SIZE as real).ln())
            .collect();
        Tables { sigmoid, log }
    }

    /// Approximate the logistic function, 1 / (1 + e^-x).
    pub fn sigmoid(&self, x: real) -> real {
        if x < -MAX_SIGMOID {
            0.0
        } else if x > MAX_SIGMOID {
            1.0
        } else {
            let i = ((x + MAX_SIGMOID) * SIGMOID_TABLE_SIZE as real / MAX_SIGMOID / 2.0) as usize;
            self.sigmoid[i]
        }
    }

    /// Approximate `ln(x)` for `x` in `0..=1`. Larger arguments give 0.
    pub fn log(&self, x: real) -> real {
        if x > 1.0 {
            return 0.0;
        }
        // `as usize` saturates, so negative and NaN arguments land on bucket 0.
        let i = (x * LOG_TABLE_SIZE as real) as usize;
        self.log[i]
    }
}

/// Log used for ranking predictions; exact, but never -inf.
pub(crate) fn std_log(x: real) -> real {
    (x + 1e-5).ln()
}
