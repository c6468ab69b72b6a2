//! Artifact name composition
//!
//! Templates carry literal placeholder tokens that are replaced with the
//! operator serial and the window statistics:
//!
//! | token     | value                                    |
//! |-----------|------------------------------------------|
//! | `SERIAL`  | operator serial                          |
//! | `nnnnnnn` | frequency of minimum VSWR, 7-digit kHz   |
//! | `m.mm`    | minimum VSWR                             |
//! | `x.xx`    | VSWR nearest the window start            |
//! | `y.yy`    | VSWR nearest the window reference point  |
//! | `z.zz`    | maximum in-window VSWR                   |

use crate::core::serial_entry::Serial;
use crate::core::vswr::VswrStats;
use thiserror::Error;

/// Required serial token
pub const SERIAL_TOKEN: &str = "SERIAL";

const MIN_FREQ_TOKEN: &str = "nnnnnnn";
const MIN_VSWR_TOKEN: &str = "m.mm";
const START_VSWR_TOKEN: &str = "x.xx";
const MID_VSWR_TOKEN: &str = "y.yy";
const MAX_VSWR_TOKEN: &str = "z.zz";

/// Every placeholder token
pub const TOKENS: [&str; 6] = [
    SERIAL_TOKEN,
    MIN_FREQ_TOKEN,
    MIN_VSWR_TOKEN,
    START_VSWR_TOKEN,
    MID_VSWR_TOKEN,
    MAX_VSWR_TOKEN,
];

/// Template errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Template lacks a required token
    #[error("Filename template has no {0} token")]
    MissingToken(&'static str),

    /// A value needed by the template has not been produced yet
    #[error("No value for {0}")]
    MissingValue(&'static str),

    /// Statistic is NaN or infinite
    #[error("Statistic for {0} is not a finite number")]
    NonFinite(&'static str),
}

/// Resolve every token in `template`
pub fn compose(
    template: &str,
    serial: Option<&Serial>,
    stats: Option<&VswrStats>,
) -> Result<String, TemplateError> {
    if !template.contains(SERIAL_TOKEN) {
        return Err(TemplateError::MissingToken(SERIAL_TOKEN));
    }
    let serial = serial.ok_or(TemplateError::MissingValue(SERIAL_TOKEN))?;
    let stats = stats.ok_or(TemplateError::MissingValue("VSWR statistics"))?;

    let ratios = [
        (MIN_VSWR_TOKEN, stats.min_vswr),
        (START_VSWR_TOKEN, stats.start_vswr),
        (MID_VSWR_TOKEN, stats.mid_vswr),
        (MAX_VSWR_TOKEN, stats.max_vswr),
    ];

    let mut name = template
        .replace(SERIAL_TOKEN, serial.as_str())
        .replace(MIN_FREQ_TOKEN, &format!("{:07}", stats.min_freq_khz));
    for (token, value) in ratios {
        if !template.contains(token) {
            continue;
        }
        if !value.is_finite() {
            return Err(TemplateError::NonFinite(token));
        }
        name = name.replace(token, &format!("{value:.2}"));
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "E-Dot-FINAL_SERIAL_nnnnnnn_m.mm_x.xx_y.yy_z.zz";

    fn stats() -> VswrStats {
        VswrStats {
            min_freq_khz: 1_621_000,
            min_vswr: 1.104,
            start_vswr: 1.456,
            mid_vswr: 1.118,
            max_vswr: 1.499,
        }
    }

    fn serial() -> Serial {
        Serial::parse("abcde").unwrap()
    }

    #[test]
    fn test_compose_all_tokens() {
        let name = compose(TEMPLATE, Some(&serial()), Some(&stats())).unwrap();
        assert_eq!(name, "E-Dot-FINAL_ABCDE_1621000_1.10_1.46_1.12_1.50");
        for token in TOKENS {
            assert!(!name.contains(token), "{token} left in {name}");
        }
    }

    #[test]
    fn test_small_frequency_is_zero_padded() {
        let mut stats = stats();
        stats.min_freq_khz = 915;
        let name = compose("SERIAL_nnnnnnn", Some(&serial()), Some(&stats)).unwrap();
        assert_eq!(name, "ABCDE_0000915");
    }

    #[test]
    fn test_missing_serial_token() {
        assert_eq!(
            compose("E-Sq_nnnnnnn", Some(&serial()), Some(&stats())),
            Err(TemplateError::MissingToken(SERIAL_TOKEN))
        );
    }

    #[test]
    fn test_missing_values() {
        assert!(matches!(
            compose(TEMPLATE, None, Some(&stats())),
            Err(TemplateError::MissingValue(_))
        ));
        assert!(matches!(
            compose(TEMPLATE, Some(&serial()), None),
            Err(TemplateError::MissingValue(_))
        ));
    }

    #[test]
    fn test_non_finite_statistic() {
        let mut stats = stats();
        stats.max_vswr = f64::INFINITY;
        assert_eq!(
            compose(TEMPLATE, Some(&serial()), Some(&stats)),
            Err(TemplateError::NonFinite("z.zz"))
        );
    }
}
