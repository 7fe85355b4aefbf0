//! Certificate validity arithmetic.
//!
//! A certificate's display status is never stored; it is recomputed from
//! `expires_on` against the current date on every read.

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::models::Certificate;

/// Certificates surface a warning this long before they lapse.
pub const EXPIRY_WARNING_MONTHS: u32 = 3;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Active,
    ExpiringSoon,
    Expired,
}

pub fn expiry_for(issued_on: NaiveDate, validity_years: i16) -> NaiveDate {
    issued_on + Months::new(12 * validity_years.max(0) as u32)
}

pub fn status_on(expires_on: NaiveDate, today: NaiveDate) -> CertificateStatus {
    if today > expires_on {
        CertificateStatus::Expired
    } else if today >= expires_on - Months::new(EXPIRY_WARNING_MONTHS) {
        CertificateStatus::ExpiringSoon
    } else {
        CertificateStatus::Active
    }
}

/// Whole days from `today` to `expires_on`; negative once lapsed.
pub fn days_until_expiry(expires_on: NaiveDate, today: NaiveDate) -> i64 {
    (expires_on - today).num_days()
}

pub fn certificate_number(issued_on: NaiveDate) -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!("CT-{}-{}", issued_on.year(), tail[..8].to_uppercase())
}

/// Read-side projection of a certificate row with its derived fields.
#[skip_serializing_none]
#[derive(Serialize, Debug, Clone)]
pub struct CertificateView {
    pub id: Uuid,
    pub certificate_number: String,
    pub track_id: Uuid,
    pub issued_on: NaiveDate,
    pub expires_on: NaiveDate,
    pub status: CertificateStatus,
    pub days_until_expiry: i64,
    pub badge_url: Option<String>,
}

impl CertificateView {
    pub fn build(cert: &Certificate, today: NaiveDate) -> Self {
        Self {
            id: cert.id,
            certificate_number: cert.certificate_number.clone(),
            track_id: cert.track_id,
            issued_on: cert.issued_on,
            expires_on: cert.expires_on,
            status: status_on(cert.expires_on, today),
            days_until_expiry: days_until_expiry(cert.expires_on, today),
            badge_url: cert.badge_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn three_year_validity_window() {
        assert_eq!(expiry_for(d(2023, 1, 15), 3), d(2026, 1, 15));
    }

    #[test]
    fn expiry_clamps_short_months() {
        // Jan 31 + 1 month lands on Feb 28 in a non-leap year.
        assert_eq!(expiry_for(d(2023, 1, 31), 0), d(2023, 1, 31));
        assert_eq!(d(2023, 1, 31) + Months::new(1), d(2023, 2, 28));
    }

    #[test]
    fn status_within_warning_window() {
        let expires = expiry_for(d(2023, 1, 15), 3);
        assert_eq!(expires, d(2026, 1, 15));
        assert_eq!(status_on(expires, d(2025, 11, 1)), CertificateStatus::ExpiringSoon);
        assert_eq!(days_until_expiry(expires, d(2025, 11, 1)), 75);
    }

    #[test]
    fn status_active_before_warning_window() {
        assert_eq!(status_on(d(2026, 1, 15), d(2025, 10, 14)), CertificateStatus::Active);
        // Boundary: exactly three months out counts as expiring soon.
        assert_eq!(
            status_on(d(2026, 1, 15), d(2025, 10, 15)),
            CertificateStatus::ExpiringSoon
        );
    }

    #[test]
    fn status_expired_after_expiry() {
        assert_eq!(status_on(d(2026, 1, 15), d(2026, 1, 16)), CertificateStatus::Expired);
        // The expiry day itself is still valid.
        assert_eq!(
            status_on(d(2026, 1, 15), d(2026, 1, 15)),
            CertificateStatus::ExpiringSoon
        );
        assert_eq!(days_until_expiry(d(2026, 1, 15), d(2026, 1, 20)), -5);
    }

    #[test]
    fn certificate_numbers_carry_issue_year() {
        let n = certificate_number(d(2026, 3, 2));
        assert!(n.starts_with("CT-2026-"));
        assert_eq!(n.len(), "CT-2026-".len() + 8);
    }
}
