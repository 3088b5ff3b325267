use crate::source::event::AccessLogEvent;
use tracing::debug;

/// Why an item was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Null,
    MissingField(&'static str),
}

/// Pass valid events through and drop the rest.
///
/// Dropping is not a fault: it costs no skip budget and is only traced.
pub fn filter_event(item: Option<AccessLogEvent>) -> Result<AccessLogEvent, DropReason> {
    let event = item.ok_or(DropReason::Null)?;

    let required = [
        ("userId", &event.user_id),
        ("ipAddress", &event.ip_address),
        ("requestUrl", &event.request_url),
        ("method", &event.method),
    ];
    if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(DropReason::MissingField(*name));
    }

    Ok(event)
}

/// [`filter_event`] with the drop traced at debug level.
pub fn apply(item: Option<AccessLogEvent>) -> Option<AccessLogEvent> {
    match filter_event(item) {
        Ok(event) => {
            debug!(user_id = %event.user_id, "Processing access log");
            Some(event)
        }
        Err(reason) => {
            debug!(reason = ?reason, "Dropped item");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event() -> AccessLogEvent {
        AccessLogEvent {
            user_id: "user-1".to_string(),
            ip_address: "192.168.0.1".to_string(),
            user_agent: String::new(),
            request_url: "/api/data/1".to_string(),
            method: "GET".to_string(),
            access_time: Utc::now(),
        }
    }

    #[test]
    fn test_valid_event_passes_unchanged() {
        let e = event();
        assert_eq!(filter_event(Some(e.clone())), Ok(e));
    }

    #[test]
    fn test_null_is_dropped() {
        assert_eq!(filter_event(None), Err(DropReason::Null));
        assert_eq!(apply(None), None);
    }

    #[test]
    fn test_blank_required_field_is_dropped() {
        let mut e = event();
        e.method = "  ".to_string();
        assert_eq!(filter_event(Some(e)), Err(DropReason::MissingField("method")));

        let mut e = event();
        e.user_id.clear();
        assert_eq!(filter_event(Some(e)), Err(DropReason::MissingField("userId")));
    }

    #[test]
    fn test_empty_user_agent_is_allowed() {
        assert!(apply(Some(event())).is_some());
    }
}
