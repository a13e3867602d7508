//! Input validation for API requests.
//!
//! Validators return `Err(message)`; handlers collect them with
//! `ValidationErrorBuilder::check` from the `error` module.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{MetricValues, UserRole, UserStatus};

pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    /// Pragmatic email shape check: local@domain.tld
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// Lowercase alphanumeric with dashes
    static ref SLUG_REGEX: Regex = Regex::new(
        r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$"
    ).unwrap();

    /// Tracking codes: letters, digits, dash and underscore
    static ref TRACKING_CODE_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9_-]+$"
    ).unwrap();

    static ref HTTP_URL_REGEX: Regex = Regex::new(
        r"^https?://[^\s/$.?#][^\s]*$"
    ).unwrap();
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Name is required".to_string());
    }
    if name.chars().count() > 100 {
        return Err("Name is too long (max 100 characters)".to_string());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

/// Validate an optional free-text contact field (phone, company, telegram)
pub fn validate_optional_text(value: &Option<String>, label: &str) -> Result<(), String> {
    if let Some(v) = value {
        if v.chars().count() > 100 {
            return Err(format!("{} is too long (max 100 characters)", label));
        }
    }
    Ok(())
}

/// Projected FTDs is a short bucket label such as "10-50"
pub fn validate_projected_ftds(value: &Option<String>) -> Result<(), String> {
    if let Some(v) = value {
        if v.chars().count() > 20 {
            return Err("Projected FTDs is too long (max 20 characters)".to_string());
        }
    }
    Ok(())
}

pub fn validate_cpa_amount(value: Option<f64>) -> Result<(), String> {
    if let Some(v) = value {
        if !v.is_finite() || v < 0.0 {
            return Err("CPA amount must be a non-negative number".to_string());
        }
    }
    Ok(())
}

pub fn parse_role(role: &str) -> Result<UserRole, String> {
    role.parse()
        .map_err(|_| "Role must be one of: admin, affiliate".to_string())
}

pub fn parse_status(status: &str) -> Result<UserStatus, String> {
    status
        .parse()
        .map_err(|_| "Status must be one of: pending, active, banned, rejected".to_string())
}

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_date(date: &str) -> Result<NaiveDate, String> {
    let date = date.trim();
    if date.len() != 10 {
        return Err("Date must be in YYYY-MM-DD format".to_string());
    }
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| "Date must be a valid YYYY-MM-DD date".to_string())?;
    // Dates are stored and compared as text, so only the canonical form is accepted
    if parsed.format("%Y-%m-%d").to_string() != date {
        return Err("Date must be in YYYY-MM-DD format".to_string());
    }
    Ok(parsed)
}

pub fn validate_date(date: &str) -> Result<(), String> {
    parse_date(date).map(|_| ())
}

/// Validate an optional inclusive range; start may not be after end
pub fn validate_date_range(start: Option<&str>, end: Option<&str>) -> Result<(), String> {
    let start = start.map(parse_date).transpose()?;
    let end = end.map(parse_date).transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err("start_date must not be after end_date".to_string());
        }
    }
    Ok(())
}

/// Counters must be non-negative integers, amounts non-negative finite numbers
pub fn validate_metric_values(values: &MetricValues) -> Result<(), String> {
    let counters = [
        ("clicks", values.clicks),
        ("registrations", values.registrations),
        ("ftds", values.ftds),
        ("qualified_cpa", values.qualified_cpa),
    ];
    for (field, value) in counters {
        if value < 0 {
            return Err(format!("{} must not be negative", field));
        }
    }

    let amounts = [
        ("deposit_amount", values.deposit_amount),
        ("commission_cpa", values.commission_cpa),
        ("commission_rev", values.commission_rev),
    ];
    for (field, value) in amounts {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{} must be a non-negative number", field));
        }
    }

    Ok(())
}

pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() {
        return Err("Slug is required".to_string());
    }
    if slug.len() > 63 {
        return Err("Slug is too long (max 63 characters)".to_string());
    }
    if !SLUG_REGEX.is_match(slug) {
        return Err(
            "Slug must be lowercase alphanumeric with dashes, starting and ending with alphanumeric"
                .to_string(),
        );
    }
    Ok(())
}

pub fn validate_tracking_code(code: &str) -> Result<(), String> {
    let code = code.trim();
    if code.len() < 3 || code.len() > 64 {
        return Err("Tracking code must be 3-64 characters".to_string());
    }
    if !TRACKING_CODE_REGEX.is_match(code) {
        return Err("Tracking code may only contain letters, digits, '-' and '_'".to_string());
    }
    Ok(())
}

/// Landing page URL. Empty is allowed for links created implicitly.
pub fn validate_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    if url.is_empty() {
        return Ok(());
    }
    if url.len() > 2048 {
        return Err("URL is too long (max 2048 characters)".to_string());
    }
    if !HTTP_URL_REGEX.is_match(url) {
        return Err("URL must start with http:// or https://".to_string());
    }
    Ok(())
}

/// Required identifier field
pub fn validate_id(id: &str, label: &str) -> Result<(), String> {
    if id.trim().is_empty() {
        return Err(format!("{} is required", label));
    }
    Ok(())
}
