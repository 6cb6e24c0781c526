//! Pass options and configuration for Tessel.
//!
//! The layout pass is parameterised by the vreg geometry of the target and
//! by whether the annotated function is re-checked afterwards. Options come
//! from defaults, a TOML file, or both, with CLI flags applied on top:
//!
//! ```toml
//! verify = true
//!
//! [target]
//! sublanes = 8
//! lanes = 128
//! ```

#![warn(missing_docs)]

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tessel_layout::TargetShape;

/// Options of the vector layout inference pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Vreg geometry of the target.
    pub target: TargetShape,
    /// Re-check the structural invariants of the annotations after the pass.
    pub verify: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            target: TargetShape::default(),
            verify: true,
        }
    }
}

impl Options {
    /// Load options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// describes an invalid target.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse options from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the content is not valid TOML or describes an
    /// invalid target.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Overrides the target dimensions that are given.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting target is invalid.
    pub fn with_target_overrides(
        mut self,
        sublanes: Option<i64>,
        lanes: Option<i64>,
    ) -> Result<Self, ConfigError> {
        if let Some(sublanes) = sublanes {
            self.target.sublanes = sublanes;
        }
        if let Some(lanes) = lanes {
            self.target.lanes = lanes;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that the options describe a usable target.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTarget`] unless both dimensions are
    /// positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.is_valid() {
            Ok(())
        } else {
            Err(ConfigError::InvalidTarget(self.target))
        }
    }
}

/// Errors that can occur while loading options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    NotFound(Utf8PathBuf),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Target dimensions are not positive.
    #[error("invalid target shape {0}: sublanes and lanes must be positive")]
    InvalidTarget(TargetShape),
}
