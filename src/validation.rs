//! Input validation for user-supplied request data.
//!
//! These checks run before anything is sent. Each returns a short message
//! suitable for showing next to the form control; callers wrap it in
//! `ActionError::Validation`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Loose email shape check; the server has the final word.
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$"
    ).unwrap();
}

/// Lower bound of the match search radius, inclusive.
pub const MIN_RADIUS_KM: f64 = 2.0;
/// Upper bound of the match search radius, inclusive.
pub const MAX_RADIUS_KM: f64 = 20.0;

const MAX_NOTES_LEN: usize = 2000;
const MAX_NAME_LEN: usize = 100;
const MAX_ADDRESS_LEN: usize = 500;

pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Enter a valid email address".to_string());
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    Ok(())
}

/// Display name is optional; when given it must fit the profile field.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().chars().count() > MAX_NAME_LEN {
        return Err(format!("Name is too long (max {} characters)", MAX_NAME_LEN));
    }
    Ok(())
}

/// Both coordinates must be finite and inside the WGS84 range.
pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), String> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err("Location coordinates must be valid numbers".to_string());
    }

    if !(-90.0..=90.0).contains(&lat) {
        return Err("Latitude must be between -90 and 90".to_string());
    }

    if !(-180.0..=180.0).contains(&lon) {
        return Err("Longitude must be between -180 and 180".to_string());
    }

    Ok(())
}

pub fn validate_radius(radius_km: f64) -> Result<(), String> {
    if !radius_km.is_finite() || !(MIN_RADIUS_KM..=MAX_RADIUS_KM).contains(&radius_km) {
        return Err(format!(
            "Search radius must be between {} and {} km",
            MIN_RADIUS_KM, MAX_RADIUS_KM
        ));
    }
    Ok(())
}

/// Free-text address. Blank counts as missing.
pub fn validate_address(address: &str) -> Result<(), String> {
    let address = address.trim();
    if address.is_empty() {
        return Err("Address is required when no map location is set".to_string());
    }

    if address.len() > MAX_ADDRESS_LEN {
        return Err(format!(
            "Address is too long (max {} characters)",
            MAX_ADDRESS_LEN
        ));
    }

    Ok(())
}

pub fn validate_notes(notes: &Option<String>) -> Result<(), String> {
    if let Some(n) = notes {
        if n.len() > MAX_NOTES_LEN {
            return Err(format!("Notes are too long (max {} characters)", MAX_NOTES_LEN));
        }
    }
    Ok(())
}
