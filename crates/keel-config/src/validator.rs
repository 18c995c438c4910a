//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::Config;

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Ticks per second above which the host is likely to spin.
const HIGH_TICK_RATE: f64 = 1000.0;

/// Below this a tick period no longer fits a timer.
pub const MIN_TICK_RATE: f64 = 0.001;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// First error as a [`ConfigError`], if any.
    pub fn into_error(self) -> Option<ConfigError> {
        self.errors.into_iter().next().map(|e| ConfigError::InvalidValue {
            field: e.path,
            message: e.message,
        })
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_host(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_runtime(config, &mut result);
        Self::validate_systems(config, &mut result);

        result
    }

    fn validate_host(config: &Config, result: &mut ValidationResult) {
        let rates = [
            ("host.tick_rate", config.host.tick_rate),
            ("host.fixed_tick_rate", config.host.fixed_tick_rate),
        ];
        for (path, rate) in rates {
            if !rate.is_finite() || rate <= 0.0 {
                result.add_error(ValidationError::new(path, "must be a positive number"));
            } else if rate < MIN_TICK_RATE {
                result.add_error(ValidationError::new(
                    path,
                    format!("must be at least {}/s", MIN_TICK_RATE),
                ));
            } else if rate > HIGH_TICK_RATE {
                result.add_warning(ValidationWarning::new(
                    path,
                    "rate is very high (>1000/s), the host will busy-loop",
                ));
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new("logging.level", "Level cannot be empty"));
        }

        if config.logging.file && config.logging.directory.as_os_str().is_empty() {
            result.add_error(ValidationError::new(
                "logging.directory",
                "Directory cannot be empty when file logging is on",
            ));
        }
    }

    fn validate_runtime(config: &Config, result: &mut ValidationResult) {
        if config.runtime.symbols.iter().any(|s| s.trim().is_empty()) {
            result.add_warning(ValidationWarning::new(
                "runtime.symbols",
                "Empty symbol names are ignored",
            ));
        }
    }

    fn validate_systems(config: &Config, result: &mut ValidationResult) {
        for (name, system) in &config.systems {
            let path = format!("systems.{}", name);
            if name.trim().is_empty() {
                result.add_warning(ValidationWarning::new(
                    &path,
                    "Override for an empty name matches no system",
                ));
            }
            if !system.enabled && system.priority.is_some() {
                result.add_warning(ValidationWarning::new(
                    &path,
                    "Priority has no effect on a disabled system",
                ));
            }
        }
    }
}
