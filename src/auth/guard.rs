use log::warn;

use crate::api::ApiError;

pub fn is_unauthorized(status: u16) -> bool {
    status == 401 || status == 403
}

/// 2xx, which includes 207 multi-status for partially applied batches.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Error for a non-2xx response: 401/403 become [`ApiError::Unauthorized`],
/// anything else carries the body text verbatim.
pub fn status_error(status: u16, body: String) -> ApiError {
    if is_unauthorized(status) {
        ApiError::Unauthorized(status)
    } else {
        ApiError::Status { status, body }
    }
}

/// Passes a request result through, firing `on_unauthorized` exactly once when
/// it failed with 401/403. The error is still returned to the caller.
pub fn intercept<T>(
    result: Result<T, ApiError>,
    on_unauthorized: Option<&mut dyn FnMut()>,
) -> Result<T, ApiError> {
    if let Err(ApiError::Unauthorized(status)) = &result {
        warn!("backend answered {status}; session is no longer valid");
        if let Some(cb) = on_unauthorized {
            cb();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert!(is_success(200));
        assert!(is_success(207));
        assert!(!is_success(302));
        assert!(matches!(
            status_error(401, String::new()),
            ApiError::Unauthorized(401)
        ));
        assert!(matches!(
            status_error(403, String::new()),
            ApiError::Unauthorized(403)
        ));
        assert_eq!(
            status_error(500, "boom".to_string()).to_string(),
            "Error 500: boom"
        );
    }

    #[test]
    fn callback_fires_once_per_unauthorized_call() {
        let mut calls = 0;
        let mut cb = || calls += 1;

        let r: Result<(), _> = intercept(Err(ApiError::Unauthorized(401)), Some(&mut cb));
        assert!(r.unwrap_err().is_unauthorized());
        let r = intercept(Ok(5), Some(&mut cb));
        assert_eq!(r.unwrap(), 5);
        let r: Result<(), _> = intercept(
            Err(ApiError::Status {
                status: 500,
                body: String::new(),
            }),
            Some(&mut cb),
        );
        assert!(r.is_err());

        assert_eq!(calls, 1);
    }

    #[test]
    fn missing_callback_still_rejects() {
        let r: Result<(), _> = intercept(Err(ApiError::Unauthorized(403)), None);
        assert!(r.is_err());
    }
}
