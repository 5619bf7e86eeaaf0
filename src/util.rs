//! Utility functions used in all other roiseries modules.


/// Format a float the way numpy's `savetxt` does with its default `%.18e` format.
///
/// # Examples
///
/// ```
/// assert_eq!(roiseries::util::format_sci(1.0), "1.000000000000000000e+00");
/// assert_eq!(roiseries::util::format_sci(-0.00125), "-1.250000000000000000e-03");
/// ```
pub fn format_sci(v: f64) -> String {
    if v.is_nan() {
        return String::from("nan");
    }
    if v.is_infinite() {
        return String::from(if v > 0.0 { "inf" } else { "-inf" });
    }
    let repr = format!("{:.18e}", v);
    match repr.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            Err(_) => repr,
        },
        None => repr,
    }
}
