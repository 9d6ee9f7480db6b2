//! Randomized domain data used when a field has no better source.

use chrono::{Duration, Local, NaiveDate};
use rand::seq::SliceRandom;
use rand::Rng;

const ENGLISH_NAMES: &[&str] = &["SomDara", "VongRith", "KimHeang", "SokLeap", "LongDara"];

const KHMER_COMPANY_NAMES: &[&str] = &[
    "គៅគៃ",
    "លីម៉េង",
    "សេងហួរ",
    "តាយ៉ុង",
    "អាយអិនជីនៀរ",
    "អេសជីអិល",
    "អេសអេសអេស",
    "អេសអេចខេ",
    "អាយអាយអាយ",
    "អេសធីអាយ",
    "អេសជីធី",
    "អេអាយធី",
    "អេធីឃេ",
];

pub(crate) fn digits<R: Rng + ?Sized>(rng: &mut R, count: usize) -> String {
    (0..count)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

pub(crate) fn lowercase<R: Rng + ?Sized>(rng: &mut R, count: usize) -> String {
    (0..count)
        .map(|_| char::from(b'a' + rng.gen_range(0..26u8)))
        .collect()
}

pub(crate) fn pick<'a, R: Rng + ?Sized>(rng: &mut R, pool: &[&'a str]) -> &'a str {
    pool.choose(rng).copied().unwrap_or_default()
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// A date between 1 and `max_days` days ago.
pub fn past_date<R: Rng + ?Sized>(rng: &mut R, max_days: i64) -> String {
    let offset = rng.gen_range(1..=max_days.max(1));
    format_date(today() - Duration::days(offset))
}

/// `lat,lng` inside Cambodia's bounding box, six decimals each.
pub fn lat_lng<R: Rng + ?Sized>(rng: &mut R) -> String {
    let lat: f64 = rng.gen_range(10.0..=14.5);
    let lng: f64 = rng.gen_range(102.0..=107.0);
    format!("{lat:.6},{lng:.6}")
}

pub fn passport_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("A{}", digits(rng, 9))
}

pub fn email_address<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{}@mailinator.com", lowercase(rng, 8))
}

pub fn phone_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("8{}", digits(rng, 10))
}

pub fn khmer_company_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(rng, KHMER_COMPANY_NAMES).to_string()
}

pub fn english_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    pick(rng, ENGLISH_NAMES).to_string()
}

pub fn auto_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("AUTO_{}", rng.gen_range(1000..=9999))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn identifiers_have_expected_shapes() {
        let mut rng = StdRng::seed_from_u64(42);

        let passport = passport_number(&mut rng);
        assert_eq!(passport.len(), 10);
        assert!(passport.starts_with('A'));
        assert!(passport[1..].chars().all(|c| c.is_ascii_digit()));

        let phone = phone_number(&mut rng);
        assert_eq!(phone.len(), 11);
        assert!(phone.starts_with('8'));

        let email = email_address(&mut rng);
        assert!(email.ends_with("@mailinator.com"));
        assert_eq!(email.split('@').next().map(str::len), Some(8));

        let token = auto_token(&mut rng);
        assert!(token.starts_with("AUTO_"));
        assert_eq!(token.len(), 9);
    }

    #[test]
    fn lat_lng_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..50 {
            let value = lat_lng(&mut rng);
            let (lat, lng) = value.split_once(',').expect("comma separated");
            let lat: f64 = lat.parse().expect("lat");
            let lng: f64 = lng.parse().expect("lng");
            assert!((10.0..=14.5).contains(&lat));
            assert!((102.0..=107.0).contains(&lng));
            assert!(value.split(',').all(|part| part.split('.').nth(1).map(str::len) == Some(6)));
        }
    }

    #[test]
    fn past_date_is_before_today() {
        let mut rng = StdRng::seed_from_u64(5);
        let raw = past_date(&mut rng, 2000);
        let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").expect("iso date");
        assert!(date < today());
        assert!(date >= today() - Duration::days(2000));
    }
}
