use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::models::booking::{Booking, BookingUser};

/// Read-only access to authoritative booking state.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Booking with its user and destination names, or `None` if the id is unknown.
    async fn find_booking(&self, booking_id: i32) -> Result<Option<Booking>, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

const FIND_BOOKING_SQL: &str = r#"
    SELECT
        b.booking_id,
        b.total_price::float8 AS total_price,
        b.guests,
        b.nights,
        b."StartDate"::timestamptz AS start_date,
        b.confirmed,
        b.created_at::timestamptz AS created_at,
        u.user_id,
        u.name AS user_name,
        u.email AS user_email
    FROM bookings b
    JOIN users u ON u.user_id = b.user_id
    WHERE b.booking_id = $1
"#;

const FIND_DESTINATIONS_SQL: &str = r#"
    SELECT d.name
    FROM booking_destinations bd
    JOIN destinations d ON d.destination_id = bd.destination_id
    WHERE bd.booking_id = $1
    ORDER BY d.destination_id
"#;

/// PostgreSQL-backed [`BookingStore`]. Reconnects lazily if the connection drops.
pub struct PgBookingStore {
    database_url: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl PgBookingStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let store = Self {
            database_url: database_url.to_string(),
            client: Mutex::new(None),
        };

        store.client().await?;

        Ok(store)
    }

    async fn client(&self) -> Result<Arc<Client>, Error> {
        let mut guard = self.client.lock().await;

        if let Some(client) = guard.as_ref().filter(|client| !client.is_closed()) {
            return Ok(Arc::clone(client));
        }

        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        info!("PostgreSQL connection established");

        let client = Arc::new(client);
        *guard = Some(Arc::clone(&client));

        Ok(client)
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn find_booking(&self, booking_id: i32) -> Result<Option<Booking>, Error> {
        let client = self.client().await?;

        let Some(row) = client
            .query_opt(FIND_BOOKING_SQL, &[&booking_id])
            .await
            .map_err(|e| anyhow!("Booking lookup failed: {}", e))?
        else {
            debug!(booking_id, "Booking not found");
            return Ok(None);
        };

        let destinations = client
            .query(FIND_DESTINATIONS_SQL, &[&booking_id])
            .await
            .map_err(|e| anyhow!("Destination lookup failed: {}", e))?
            .iter()
            .map(|row| row.try_get::<_, String>("name"))
            .collect::<Result<Vec<_>, _>>()?;

        let booking = booking_from_row(&row, destinations)?;

        debug!(
            booking_id,
            destination_count = booking.destinations.len(),
            "Booking loaded"
        );

        Ok(Some(booking))
    }

    async fn health_check(&self) -> Result<(), Error> {
        let client = self.client().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| anyhow!("Database health check failed: {}", e))?;

        Ok(())
    }
}

fn booking_from_row(row: &Row, destinations: Vec<String>) -> Result<Booking, Error> {
    Ok(Booking {
        booking_id: row.try_get("booking_id")?,
        user: BookingUser {
            user_id: row.try_get("user_id")?,
            name: row.try_get("user_name")?,
            email: row.try_get("user_email")?,
        },
        destinations,
        total_price: row.try_get("total_price")?,
        guests: row.try_get("guests")?,
        nights: row.try_get("nights")?,
        start_date: row.try_get::<_, DateTime<Utc>>("start_date")?,
        confirmed: row.try_get("confirmed")?,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
    })
}
