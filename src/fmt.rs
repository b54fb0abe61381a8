use crate::models::DEFAULT_CURRENCY;

/// Format a float as a dollar amount with thousands separators: $1,234.56
pub fn money(val: f64) -> String {
    let negative = val < 0.0;
    let cents = format!("{:.2}", val.abs());
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((cents.as_str(), "00"));

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-${with_commas}.{dec_part}")
    } else {
        format!("${with_commas}.{dec_part}")
    }
}

/// Amount in its currency; dollars get the `$` form.
pub fn amount(val: Option<f64>, currency: &str) -> String {
    match val {
        None => "-".to_string(),
        Some(v) if currency.eq_ignore_ascii_case(DEFAULT_CURRENCY) => money(v),
        Some(v) => format!("{v:.2} {currency}"),
    }
}

/// Human-readable byte count: 512 B, 2.0 KB, 1.5 MB
pub fn format_bytes(len: u64) -> String {
    const KB: f64 = 1024.0;
    let n = len as f64;
    if n < KB {
        format!("{len} B")
    } else if n < KB * KB {
        format!("{:.1} KB", n / KB)
    } else {
        format!("{:.1} MB", n / (KB * KB))
    }
}
