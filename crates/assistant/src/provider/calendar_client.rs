use chrono::{DateTime, TimeDelta, Utc};
use google_calendar3::api::{Event, EventDateTime};
use google_calendar3::hyper_rustls::HttpsConnector;
use google_calendar3::CalendarHub;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::error::ProviderError;

/// Client for interacting with Google Calendar API
pub struct CalendarClient {
    hub: CalendarHub<HttpsConnector<HttpConnector>>,
}

/// Flattened view of an event as handed to the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub summary: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: String,
    pub description: String,
    pub attendees: String,
}

impl CalendarClient {
    pub fn new(credential: &Credential) -> Result<Self, ProviderError> {
        let connector = google_calendar3::hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| ProviderError::Connector(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(connector);
        let hub = CalendarHub::new(client, credential.access_token.clone());

        Ok(Self { hub })
    }

    /// Events on the primary calendar from now until `days_ahead` days out.
    pub async fn upcoming_events(
        &self,
        days_ahead: i64,
    ) -> Result<Vec<EventSummary>, ProviderError> {
        let now = Utc::now();
        let until = window_end(now, days_ahead)?;

        let (_, events) = self
            .hub
            .events()
            .list("primary")
            .time_min(now)
            .time_max(until)
            .single_events(true)
            .order_by("startTime")
            .doit()
            .await
            .map_err(|e| ProviderError::google("events.list", e))?;

        let items = events.items.unwrap_or_default();
        if items.is_empty() {
            tracing::info!("No upcoming events found");
        }

        Ok(items.iter().map(EventSummary::from_event).collect())
    }
}

/// `now` plus `days` days, rejecting windows chrono cannot represent.
fn window_end(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, ProviderError> {
    TimeDelta::try_days(days)
        .and_then(|window| now.checked_add_signed(window))
        .ok_or(ProviderError::EventWindow(days))
}

fn format_when(when: Option<&EventDateTime>) -> Option<String> {
    let when = when?;
    // Timed events carry dateTime, all-day events only a date.
    match (&when.date_time, &when.date) {
        (Some(date_time), _) => Some(date_time.to_rfc3339()),
        (None, Some(date)) => Some(date.to_string()),
        (None, None) => None,
    }
}

impl EventSummary {
    pub fn from_event(event: &Event) -> Self {
        let attendees = event
            .attendees
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|a| a.email.as_deref())
            .collect::<Vec<_>>()
            .join(", ");

        EventSummary {
            summary: event
                .summary
                .clone()
                .unwrap_or_else(|| "No Title".to_string()),
            start: format_when(event.start.as_ref()),
            end: format_when(event.end.as_ref()),
            location: event
                .location
                .clone()
                .unwrap_or_else(|| "No Location Specified".to_string()),
            description: event
                .description
                .clone()
                .unwrap_or_else(|| "No Description".to_string()),
            attendees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use google_calendar3::api::EventAttendee;

    #[test]
    fn test_timed_event_summary() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap();
        let event = Event {
            summary: Some("Design review".to_string()),
            location: Some("Room 4".to_string()),
            start: Some(EventDateTime {
                date_time: Some(start),
                ..Default::default()
            }),
            end: Some(EventDateTime {
                date_time: Some(start + TimeDelta::hours(1)),
                ..Default::default()
            }),
            attendees: Some(vec![
                EventAttendee {
                    email: Some("ann@example.com".to_string()),
                    ..Default::default()
                },
                EventAttendee {
                    display_name: Some("No address".to_string()),
                    ..Default::default()
                },
                EventAttendee {
                    email: Some("bob@example.com".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let summary = EventSummary::from_event(&event);
        assert_eq!(summary.summary, "Design review");
        assert_eq!(summary.start.as_deref(), Some("2024-05-01T15:00:00+00:00"));
        assert_eq!(summary.end.as_deref(), Some("2024-05-01T16:00:00+00:00"));
        assert_eq!(summary.location, "Room 4");
        assert_eq!(summary.description, "No Description");
        assert_eq!(summary.attendees, "ann@example.com, bob@example.com");
    }

    #[test]
    fn test_event_defaults() {
        let summary = EventSummary::from_event(&Event::default());
        assert_eq!(summary.summary, "No Title");
        assert_eq!(summary.location, "No Location Specified");
        assert_eq!(summary.start, None);
        assert_eq!(summary.attendees, "");
    }

    #[test]
    fn test_window_end() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        assert_eq!(
            window_end(now, 10).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 11, 9, 0, 0).unwrap()
        );
        assert!(matches!(
            window_end(now, 999_999_999_999),
            Err(ProviderError::EventWindow(999_999_999_999))
        ));
        // Representable as a delta, but past the last representable date.
        assert!(matches!(
            window_end(now, 100_000_000),
            Err(ProviderError::EventWindow(_))
        ));
    }
}
