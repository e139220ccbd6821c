use std::fmt;
use std::str::FromStr;

/// User supplied device identifier: `"<vendor>"` or `"<vendor>/<model>"`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    vendor: String,
    model: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Device identifier is empty")]
    Empty,

    #[error("Device identifier \"{0}\" must be \"<vendor>\" or \"<vendor>/<model>\"")]
    Malformed(String),
}

impl DeviceIdentity {
    pub fn vendor(vendor: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            model: None,
        }
    }

    pub fn qualified(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            model: Some(model.into()),
        }
    }

    pub fn vendor_key(&self) -> &str {
        &self.vendor
    }

    pub fn model_key(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn is_qualified(&self) -> bool {
        self.model.is_some()
    }
}

impl FromStr for DeviceIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }
        match s.split_once('/') {
            None => Ok(Self::vendor(s)),
            Some((vendor, model))
                if !vendor.is_empty() && !model.is_empty() && !model.contains('/') =>
            {
                Ok(Self::qualified(vendor, model))
            }
            Some(_) => Err(IdentityError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}/{}", self.vendor, model),
            None => write!(f, "{}", self.vendor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_forms() {
        let vendor: DeviceIdentity = "ps3".parse().unwrap();
        assert_eq!(vendor.vendor_key(), "ps3");
        assert_eq!(vendor.model_key(), None);
        assert!(!vendor.is_qualified());

        let qualified: DeviceIdentity = "ps3/dualshock3".parse().unwrap();
        assert_eq!(qualified.vendor_key(), "ps3");
        assert_eq!(qualified.model_key(), Some("dualshock3"));
        assert_eq!(qualified.to_string(), "ps3/dualshock3");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        assert_eq!("  ".parse::<DeviceIdentity>(), Err(IdentityError::Empty));
        for bad in ["/pad", "acme/", "a/b/c"] {
            assert!(matches!(
                bad.parse::<DeviceIdentity>(),
                Err(IdentityError::Malformed(_))
            ));
        }
    }
}
