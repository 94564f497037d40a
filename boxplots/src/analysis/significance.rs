/// Star rating of a p-value; `None` means not significant and nothing is drawn.
/// Thresholds are inclusive: exactly 0.001 is `***`, exactly 0.05 is `*`.
pub fn significance_stars(p_value: f64) -> Option<&'static str> {
    if p_value <= 0.001 {
        Some("***")
    } else if p_value <= 0.01 {
        Some("**")
    } else if p_value <= 0.05 {
        Some("*")
    } else {
        None
    }
}

/// Two significant digits, switching to exponent notation for very small
/// values (`0.0009`, `0.012`, `1.2e-05`).
pub fn format_p_value(p_value: f64) -> String {
    if p_value == 0.0 || !p_value.is_finite() {
        return format!("{}", p_value);
    }
    let mut exponent = p_value.abs().log10().floor() as i32;
    let mantissa = (p_value / 10f64.powi(exponent - 1)).round();
    if mantissa.abs() >= 100.0 {
        exponent += 1;
    }

    if exponent < -4 || exponent >= 2 {
        let s = format!("{:.1e}", p_value);
        let (digits, exp) = s.split_once('e').unwrap_or((s.as_str(), "0"));
        let digits = digits.trim_end_matches('0').trim_end_matches('.');
        let exp: i32 = exp.parse().unwrap_or(exponent);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", digits, sign, exp.abs())
    } else {
        let decimals = (1 - exponent).max(0) as usize;
        let s = format!("{:.*}", decimals, p_value);
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_thresholds() {
        assert_eq!(significance_stars(0.0), Some("***"));
        assert_eq!(significance_stars(0.0005), Some("***"));
        assert_eq!(significance_stars(0.001), Some("***"));
        assert_eq!(significance_stars(0.0011), Some("**"));
        assert_eq!(significance_stars(0.01), Some("**"));
        assert_eq!(significance_stars(0.011), Some("*"));
        assert_eq!(significance_stars(0.05), Some("*"));
        assert_eq!(significance_stars(0.0501), None);
        assert_eq!(significance_stars(1.0), None);
    }

    #[test]
    fn p_value_formatting() {
        assert_eq!(format_p_value(0.0009), "0.0009");
        assert_eq!(format_p_value(0.0123), "0.012");
        assert_eq!(format_p_value(0.05), "0.05");
        assert_eq!(format_p_value(0.5), "0.5");
        assert_eq!(format_p_value(0.00001234), "1.2e-05");
        assert_eq!(format_p_value(0.0), "0");
    }
}
