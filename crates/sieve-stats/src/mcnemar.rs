use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

/// Paired 2x2 table. `a_only` and `b_only` are the discordant cells.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContingencyTable {
    pub both_success: u64,
    pub both_fail: u64,
    pub a_only: u64,
    pub b_only: u64,
}

impl ContingencyTable {
    pub fn from_pairs<I: IntoIterator<Item = (bool, bool)>>(pairs: I) -> Self {
        let mut t = Self::default();
        for (a, b) in pairs {
            match (a, b) {
                (true, true) => t.both_success += 1,
                (false, false) => t.both_fail += 1,
                (true, false) => t.a_only += 1,
                (false, true) => t.b_only += 1,
            }
        }
        t
    }

    pub fn n(&self) -> u64 {
        self.both_success + self.both_fail + self.a_only + self.b_only
    }

    pub fn discordant(&self) -> u64 {
        self.a_only + self.b_only
    }

    pub fn successes_a(&self) -> u64 {
        self.both_success + self.a_only
    }

    pub fn successes_b(&self) -> u64 {
        self.both_success + self.b_only
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct McNemarResult {
    pub chi_square: f64,
    pub p_value: f64,
    /// No discordant pairs: nothing to test.
    pub inconclusive: bool,
}

/// Continuity-corrected McNemar test, chi-square with one degree of freedom.
pub fn mcnemar(table: &ContingencyTable) -> McNemarResult {
    let discordant = table.discordant();
    if discordant == 0 {
        return McNemarResult {
            chi_square: 0.0,
            p_value: 1.0,
            inconclusive: true,
        };
    }
    let diff = (table.a_only as f64 - table.b_only as f64).abs();
    let chi_square = (diff - 1.0).max(0.0).powi(2) / discordant as f64;
    // Survival function of chi-square(1).
    let p_value = erfc((chi_square / 2.0).sqrt()).clamp(0.0, 1.0);
    McNemarResult {
        chi_square,
        p_value,
        inconclusive: false,
    }
}
