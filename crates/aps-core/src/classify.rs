/// How the router treats an upstream HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Cool the provider down and try the next one.
    Retryable,
    /// Relay verbatim to the client; the provider stays healthy.
    Passthrough,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        403 | 429 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Passthrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for status in [403, 429, 500, 502, 503, 504, 529] {
            assert_eq!(classify_status(status), StatusClass::Retryable, "{status}");
        }
        for status in [400, 401, 404, 413, 422] {
            assert_eq!(classify_status(status), StatusClass::Passthrough, "{status}");
        }
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
    }
}
