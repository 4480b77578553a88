/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

use super::consts::*;

static PROJECT_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A[a-z0-9][a-z0-9\-]{1,61}[a-z0-9]\z").unwrap()
});

static DOMAIN_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A([a-z0-9]|([a-z0-9][a-z0-9\-]*[a-z0-9]))\z").unwrap()
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A[^@\s]+@([^@\s]+\.)+[^@\s]+\z").unwrap()
});

pub fn port_in_range(s: &str) -> Result<u16, String> {
    let port: usize = s
        .parse()
        .map_err(|_| format!("`{s}` is not a port number"))?;

    if PORT_RANGE.contains(&port) {
        Ok(port as u16)
    } else {
        Err(format!(
            "port not in range {}-{}",
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ))
    }
}

pub fn greater_than_zero<
    T: std::str::FromStr + std::cmp::PartialOrd + std::fmt::Display + Default,
>(
    s: &str,
) -> Result<T, String> {
    let num: T = s
        .parse()
        .map_err(|_| format!("`{}` is not a valid number", s))?;

    if num > T::default() {
        Ok(num)
    } else {
        Err(format!("`{}` is not larger than 0", s))
    }
}

pub fn load_secret(f: &str) -> String {
    let s = std::fs::read_to_string(f).unwrap_or_default();
    s.trim().replace(char::from(25), "")
}

/// Lowercases and trims a project name, returning the normalised name or the
/// message shown next to the `name` field.
pub fn validate_project_name(name: &str) -> Result<String, String> {
    let name = name.trim().to_lowercase();

    if name.is_empty() {
        return Err("is required".to_string());
    }

    if name.len() < 3 {
        return Err("is too short (min. 3 characters)".to_string());
    }

    if name.len() > 63 {
        return Err("is too long (max. 63 characters)".to_string());
    }

    if !PROJECT_NAME_RE.is_match(&name) {
        return Err("is invalid".to_string());
    }

    Ok(name)
}

/// Trims a domain and prefixes apex names with `www.`, so `example.com`
/// and `example.co.uk` are stored as `www.example.com` and `www.example.co.uk`.
pub fn sanitize_domain(name: &str) -> Result<String, String> {
    let name = name.trim().to_lowercase();

    let apex = psl::domain_str(&name).ok_or_else(|| "is invalid".to_string())?;

    if apex == name {
        return Ok(format!("www.{}", name));
    }

    Ok(name)
}

pub fn validate_domain(name: &str, default_domain: &str) -> Result<(), String> {
    if name.len() < 3 {
        return Err("is too short (min. 3 characters)".to_string());
    }

    if name.len() > 255 {
        return Err("is too long (max. 255 characters)".to_string());
    }

    if name == default_domain || name.ends_with(&format!(".{}", default_domain)) {
        return Err("is invalid".to_string());
    }

    let labels = name.split('.').collect::<Vec<&str>>();

    if labels.len() < 2 {
        return Err("is invalid".to_string());
    }

    if labels
        .iter()
        .any(|label| label.is_empty() || !DOMAIN_LABEL_RE.is_match(label))
    {
        return Err("is invalid".to_string());
    }

    Ok(())
}

pub fn default_domain_name(project_name: &str, default_domain: &str) -> String {
    format!("{}.{}", project_name, default_domain)
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("is required".to_string());
    }

    if email.len() < 5 || !EMAIL_RE.is_match(email) {
        return Err("is invalid".to_string());
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("is required".to_string());
    }

    if password.len() < 6 {
        return Err("is too short (min. 6 characters)".to_string());
    }

    if password.len() > 72 {
        return Err("is too long (max. 72 characters)".to_string());
    }

    Ok(())
}

pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill(&mut buf[..]);
    hex::encode(buf)
}

/// Two random bytes spreading deployment keys across storage partitions.
pub fn generate_prefix() -> String {
    random_hex(2)
}

pub fn generate_token() -> String {
    random_hex(64)
}

pub fn generate_confirmation_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000))
}
