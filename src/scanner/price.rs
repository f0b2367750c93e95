//! Price text parsing.
//!
//! Marketplace price labels mix currency symbols, thousands separators of
//! either convention and suffixes such as "VB". Anything that cannot be read
//! unambiguously yields `None`.

use regex::Regex;
use std::sync::OnceLock;

use super::types::{Currency, Money};

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\d+(?:[.,'\u{a0}\u{202f}]\d+)*").expect("static price pattern")
    })
}

pub fn detect_currency(text: &str) -> Option<Currency> {
    let upper = text.to_uppercase();
    if upper.contains('€') || upper.contains("EUR") {
        Some(Currency::Eur)
    } else if upper.contains('£') || upper.contains("GBP") {
        Some(Currency::Gbp)
    } else if upper.contains("CHF") {
        Some(Currency::Chf)
    } else if upper.contains('$') || upper.contains("USD") {
        Some(Currency::Usd)
    } else {
        None
    }
}

pub fn parse_price(text: &str, default_currency: Currency) -> Option<Money> {
    let mut numbers = number_pattern().find_iter(text);
    let token = numbers.next()?.as_str();
    if numbers.next().is_some() {
        // "450 € - 500 €" or similar
        return None;
    }

    let amount_cents = parse_amount_cents(token)?;
    let currency = detect_currency(text).unwrap_or(default_currency);
    Some(Money::new(amount_cents, currency))
}

fn parse_amount_cents(token: &str) -> Option<i64> {
    let cleaned: String = token
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{a0}' | '\u{202f}'))
        .collect();

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let (integer, fraction) = match (last_dot, last_comma) {
        (None, None) => (cleaned.clone(), String::new()),
        (Some(d), Some(c)) => {
            let (decimal_at, thousands) = if d > c { (d, ',') } else { (c, '.') };
            let integer = &cleaned[..decimal_at];
            if integer.contains(if thousands == ',' { '.' } else { ',' }) {
                return None;
            }
            if !valid_groups(integer, thousands) {
                return None;
            }
            (integer.replace(thousands, ""), cleaned[decimal_at + 1..].to_string())
        }
        (Some(_), None) => split_single(&cleaned, '.')?,
        (None, Some(_)) => split_single(&cleaned, ',')?,
    };

    if fraction.len() > 2 || integer.is_empty() {
        return None;
    }

    let major: i64 = integer.parse().ok()?;
    let minor: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().ok()? * 10,
        _ => fraction.parse().ok()?,
    };
    major.checked_mul(100)?.checked_add(minor)
}

/// Only one separator kind present.
fn split_single(token: &str, sep: char) -> Option<(String, String)> {
    let count = token.matches(sep).count();
    if count > 1 {
        return valid_groups(token, sep).then(|| (token.replace(sep, ""), String::new()));
    }

    let (head, tail) = token.split_once(sep)?;
    match tail.len() {
        3 => Some((format!("{}{}", head, tail), String::new())),
        1 | 2 => Some((head.to_string(), tail.to_string())),
        _ => None,
    }
}

/// Thousands groups after the first must be exactly three digits.
fn valid_groups(integer: &str, sep: char) -> bool {
    let mut groups = integer.split(sep);
    let first_ok = groups
        .next()
        .map(|g| !g.is_empty() && g.len() <= 3 || !integer.contains(sep))
        .unwrap_or(false);
    first_ok && groups.all(|g| g.len() == 3)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eur(cents: i64) -> Option<Money> {
        Some(Money::new(cents, Currency::Eur))
    }

    #[test]
    fn test_plain_amounts() {
        assert_eq!(parse_price("450 €", Currency::Eur), eur(45000));
        assert_eq!(parse_price("450 € VB", Currency::Eur), eur(45000));
        assert_eq!(parse_price("EUR 99", Currency::Usd), eur(9900));
    }

    #[test]
    fn test_thousands_separators() {
        assert_eq!(parse_price("1.200 €", Currency::Eur), eur(120000));
        assert_eq!(parse_price("1,200 €", Currency::Eur), eur(120000));
        assert_eq!(parse_price("1.234.567 €", Currency::Eur), eur(123456700));
        assert_eq!(parse_price("1'200 CHF", Currency::Eur), Some(Money::new(120000, Currency::Chf)));
    }

    #[test]
    fn test_decimal_marks() {
        assert_eq!(parse_price("1.234,56 €", Currency::Eur), eur(123456));
        assert_eq!(
            parse_price("$1,200.50", Currency::Eur),
            Some(Money::new(120050, Currency::Usd))
        );
        assert_eq!(parse_price("12,5 €", Currency::Eur), eur(1250));
        assert_eq!(parse_price("600.00", Currency::Eur), eur(60000));
    }

    #[test]
    fn test_ambiguous_or_missing_is_none() {
        assert_eq!(parse_price("VB", Currency::Eur), None);
        assert_eq!(parse_price("Zu verschenken", Currency::Eur), None);
        assert_eq!(parse_price("1,2345 €", Currency::Eur), None);
        assert_eq!(parse_price("450 € - 500 €", Currency::Eur), None);
        assert_eq!(parse_price("1.2.3 €", Currency::Eur), None);
    }

    #[test]
    fn test_default_currency_applies() {
        assert_eq!(
            parse_price("300", Currency::Gbp),
            Some(Money::new(30000, Currency::Gbp))
        );
    }
}
