use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative booking state as read from the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub booking_id: i32,
    pub user: BookingUser,
    pub destinations: Vec<String>,
    pub total_price: f64,
    pub guests: i32,
    pub nights: i32,
    pub start_date: DateTime<Utc>,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingUser {
    pub user_id: i32,
    pub name: String,
    pub email: String,
}

impl Booking {
    pub fn end_date(&self) -> DateTime<Utc> {
        self.start_date + Duration::days(i64::from(self.nights.max(0)))
    }

    /// Destination names with blanks removed.
    pub fn destination_names(&self) -> Vec<String> {
        self.destinations
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}
