use crate::utils::error::{ProvisionError, Result};
use regex::Regex;
use std::path::{Component, Path};
use std::sync::OnceLock;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: &str, reason: impl Into<String>) -> ProvisionError {
    ProvisionError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(invalid(field_name, url_str, "URL cannot be empty"));
    }

    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(invalid(
                field_name,
                url_str,
                format!("Unsupported URL scheme: {}", scheme),
            )),
        },
        Err(e) => Err(invalid(
            field_name,
            url_str,
            format!("Invalid URL format: {}", e),
        )),
    }
}

/// A host-side path (build context, rootfs, output directory).
pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    Ok(())
}

/// A path inside the image: absolute, and never climbing out of the root.
pub fn validate_image_path(field_name: &str, path: &str) -> Result<()> {
    validate_path(field_name, path)?;

    if !path.starts_with('/') {
        return Err(invalid(field_name, path, "Image paths must be absolute"));
    }

    if Path::new(path)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid(field_name, path, "Image paths cannot contain '..'"));
    }

    Ok(())
}

/// A path relative to the build context.
pub fn validate_context_path(field_name: &str, path: &str) -> Result<()> {
    validate_path(field_name, path)?;

    let escapes = Path::new(path).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes {
        return Err(invalid(
            field_name,
            path,
            "Context paths must be relative and stay inside the build context",
        ));
    }

    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

/// apt package spec: `name`, `name:arch` or `name=version`.
pub fn validate_package_name(field_name: &str, name: &str) -> Result<()> {
    static PACKAGE: OnceLock<Regex> = OnceLock::new();
    let re = PACKAGE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9+.\-]+(:[a-z0-9\-]+)?(=[A-Za-z0-9.+:~\-]+)?$")
            .expect("package pattern is valid")
    });

    if !re.is_match(name) {
        return Err(invalid(field_name, name, "Not a valid package name"));
    }
    Ok(())
}

/// Image reference such as `ubuntu:22.04` or `registry.local/team/base:1.2`.
pub fn validate_image_reference(field_name: &str, reference: &str) -> Result<()> {
    static REFERENCE: OnceLock<Regex> = OnceLock::new();
    let re = REFERENCE.get_or_init(|| {
        Regex::new(
            r"^[a-z0-9]+([._\-][a-z0-9]+)*(:[0-9]+)?(/[a-z0-9]+([._\-][a-z0-9]+)*)*(:[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127})?(@sha256:[a-f0-9]{64})?$",
        )
        .expect("reference pattern is valid")
    });

    if !re.is_match(reference) {
        return Err(invalid(field_name, reference, "Not a valid image reference"));
    }
    Ok(())
}

pub fn validate_port(field_name: &str, port: u16) -> Result<()> {
    if port == 0 {
        return Err(invalid(field_name, "0", "Port must be between 1 and 65535"));
    }
    Ok(())
}

/// Names that become file names under `/etc/apt`.
pub fn validate_file_stem(field_name: &str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if !ok {
        return Err(invalid(
            field_name,
            name,
            "Only letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| ProvisionError::MissingConfigError {
            field: field_name.to_string(),
        })
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field_name,
            &value.to_string(),
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}
