use crate::models::compression::CompressionConfiguration;
use crate::models::error::CaptureError;

/// Outcome of a primary attempt followed, if needed, by a recovery step.
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery<T> {
    Succeeded(T),
    /// The attempt failed with `cause`; the recovery step produced `value`.
    Recovered { value: T, cause: CaptureError },
    Failed(CaptureError),
}

impl<T> Recovery<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Recovery::Succeeded(value) | Recovery::Recovered { value, .. } => Some(value),
            Recovery::Failed(_) => None,
        }
    }

    pub fn cause(&self) -> Option<&CaptureError> {
        match self {
            Recovery::Recovered { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub fn was_recovered(&self) -> bool {
        matches!(self, Recovery::Recovered { .. })
    }

    pub fn into_result(self) -> Result<T, CaptureError> {
        match self {
            Recovery::Succeeded(value) | Recovery::Recovered { value, .. } => Ok(value),
            Recovery::Failed(error) => Err(error),
        }
    }
}

/// Run `attempt`; if it fails, hand its error to `recover`.
///
/// A failing recovery yields [`Recovery::Failed`] with the recovery's error.
pub fn attempt_then_recover<T, A, R>(attempt: A, recover: R) -> Recovery<T>
where
    A: FnOnce() -> Result<T, CaptureError>,
    R: FnOnce(&CaptureError) -> Result<T, CaptureError>,
{
    match attempt() {
        Ok(value) => Recovery::Succeeded(value),
        Err(cause) => match recover(&cause) {
            Ok(value) => Recovery::Recovered { value, cause },
            Err(error) => Recovery::Failed(error),
        },
    }
}

/// Strict validation, then sanitization and a second validation.
pub fn resolve_configuration(config: &CompressionConfiguration) -> Recovery<CompressionConfiguration> {
    attempt_then_recover(
        || {
            config.validate()?;
            Ok(config.clone())
        },
        |cause| {
            let sanitized = config.sanitized();
            sanitized.validate()?;
            log::warn!("compression settings adjusted after: {}", cause);
            Ok(sanitized)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::compression::{CompressionFormat, SUPPORTED_SAMPLE_RATES};
    use crate::models::error::ConfigurationError;

    #[test]
    fn success_skips_recovery() {
        let result = attempt_then_recover(|| Ok(1), |_| -> Result<i32, CaptureError> { panic!("not reached") });
        assert_eq!(result, Recovery::Succeeded(1));
    }

    #[test]
    fn recovery_keeps_the_cause() {
        let result = attempt_then_recover(|| Err(CaptureError::EncodingFailed("boom".into())), |_| Ok("wav"));
        assert!(result.was_recovered());
        assert_eq!(result.cause(), Some(&CaptureError::EncodingFailed("boom".into())));
        assert_eq!(result.into_result(), Ok("wav"));
    }

    #[test]
    fn failed_recovery_reports_its_own_error() {
        let result: Recovery<()> = attempt_then_recover(
            || Err(CaptureError::EncodingFailed("boom".into())),
            |_| Err(CaptureError::WriteFailed("disk full".into())),
        );
        assert_eq!(result, Recovery::Failed(CaptureError::WriteFailed("disk full".into())));
        assert!(result.value().is_none());
    }

    #[test]
    fn invalid_lossy_settings_are_sanitized() {
        let config = CompressionConfiguration::new(CompressionFormat::Vorbis, 32, 12_345, 2);

        let resolved = resolve_configuration(&config);

        assert_eq!(
            resolved.cause(),
            Some(&CaptureError::InvalidConfiguration(ConfigurationError::InvalidBitrate(32)))
        );
        let value = resolved.into_result().unwrap();
        assert_eq!(value.bitrate_kbps, 64);
        assert!(SUPPORTED_SAMPLE_RATES.contains(&value.sample_rate));
    }

    #[test]
    fn valid_settings_pass_unchanged() {
        let config = CompressionConfiguration::default();
        assert_eq!(resolve_configuration(&config), Recovery::Succeeded(config));
    }
}
