//! Booking Orchestrator.
//!
//! One orchestrator backs one screen's booking board. It owns the rows that
//! screen shows, applies transitions optimistically and rolls them back when
//! the server disagrees. Boards are not shared between screens; a screen
//! reloads on mount.
//!
//! Every transition runs as `begin` (snapshot the row, flip it) -> request ->
//! `commit` or `revert`. At most one transition per booking id is in flight,
//! and a transition whose caller gives up is rolled back on drop.

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{info, warn};

use super::model::{Booking, BookingStatus, NewBooking};
use super::transition::{Party, Transition};
use crate::api::error::{ActionError, Operation};
use crate::api::ApiClient;
use crate::config::Config;

#[derive(Debug, Clone, PartialEq)]
pub struct BookingRow {
    pub booking: Booking,
    /// Inline error next to the row; cleared by the next attempt or by
    /// [`BookingOrchestrator::dismiss_error`].
    pub error: Option<ActionError>,
    /// A transition for this row is in flight; its controls are disabled.
    pub busy: bool,
}

impl BookingRow {
    fn new(booking: Booking) -> Self {
        Self {
            booking,
            error: None,
            busy: false,
        }
    }
}

/// Client-side grouping of a loaded list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPartition {
    /// Pending with no provider: open requests.
    pub unassigned: Vec<Booking>,
    /// Pending with a provider chosen, waiting for the provider.
    pub awaiting: Vec<Booking>,
    /// Accepted or in progress.
    pub active: Vec<Booking>,
    pub completed: Vec<Booking>,
    /// Cancelled or rejected.
    pub closed: Vec<Booking>,
}

impl BookingPartition {
    pub fn from_bookings<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Self {
        let mut partition = Self::default();
        for b in bookings {
            let bucket = match b.status {
                BookingStatus::Pending if b.provider_id.is_none() => &mut partition.unassigned,
                BookingStatus::Pending => &mut partition.awaiting,
                BookingStatus::Accepted | BookingStatus::InProgress => &mut partition.active,
                BookingStatus::Completed => &mut partition.completed,
                BookingStatus::Cancelled | BookingStatus::Rejected => &mut partition.closed,
            };
            bucket.push(b.clone());
        }
        partition
    }

    pub fn total(&self) -> usize {
        self.unassigned.len()
            + self.awaiting.len()
            + self.active.len()
            + self.completed.len()
            + self.closed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Default)]
struct BoardState {
    rows: Vec<BookingRow>,
    in_flight: HashSet<i64>,
}

impl BoardState {
    fn row_mut(&mut self, id: i64) -> Option<&mut BookingRow> {
        self.rows.iter_mut().find(|r| r.booking.id == id)
    }
}

pub struct BookingOrchestrator {
    api: ApiClient,
    perspective: Party,
    quick_book_lead: Duration,
    state: Mutex<BoardState>,
}

impl BookingOrchestrator {
    pub fn new(api: ApiClient, perspective: Party) -> Self {
        Self {
            api,
            perspective,
            quick_book_lead: Duration::minutes(60),
            state: Mutex::new(BoardState::default()),
        }
    }

    pub fn for_requester(api: ApiClient) -> Self {
        Self::new(api, Party::Requester)
    }

    pub fn for_provider(api: ApiClient) -> Self {
        Self::new(api, Party::Provider)
    }

    pub fn with_config(mut self, config: &Config) -> Self {
        self.quick_book_lead = config.booking.quick_book_lead();
        self
    }

    pub fn perspective(&self) -> Party {
        self.perspective
    }

    /// Validate and submit a new booking. A rejected draft sends nothing; the
    /// caller keeps its form as it was.
    pub async fn create(&self, draft: &NewBooking) -> Result<Booking, ActionError> {
        let payload = draft.validate(Utc::now(), self.quick_book_lead)?;

        let booking = self
            .api
            .create_booking(&payload)
            .await
            .map_err(|e| ActionError::classify(e, Operation::Submit, "Could not create booking."))?;

        info!(
            booking_id = booking.id,
            status = %booking.status,
            provider_id = ?booking.provider_id,
            "Booking created"
        );

        let mut state = self.state.lock();
        state.rows.retain(|r| r.booking.id != booking.id);
        state.rows.insert(0, BookingRow::new(booking.clone()));
        Ok(booking)
    }

    /// Load the signed-in account's own bookings (`GET /bookings`).
    pub async fn load_mine(&self) -> Result<BookingPartition, ActionError> {
        let bookings = self
            .api
            .list_bookings()
            .await
            .map_err(|e| ActionError::classify(e, Operation::Read, "Failed to load bookings."))?;
        Ok(self.replace_rows(bookings))
    }

    /// Load bookings assigned or open to the signed-in provider
    /// (`GET /bookings/provider`).
    pub async fn load_assigned(&self) -> Result<BookingPartition, ActionError> {
        let bookings = self
            .api
            .list_provider_bookings()
            .await
            .map_err(|e| ActionError::classify(e, Operation::Read, "Failed to load bookings."))?;
        Ok(self.replace_rows(bookings))
    }

    pub async fn accept(&self, id: i64) -> Result<Booking, ActionError> {
        self.run(id, Transition::Accept).await
    }

    pub async fn reject(&self, id: i64) -> Result<Booking, ActionError> {
        self.run(id, Transition::Reject).await
    }

    pub async fn complete(&self, id: i64) -> Result<Booking, ActionError> {
        self.run(id, Transition::Complete).await
    }

    /// Cancel as whichever party this board acts for.
    pub async fn cancel(&self, id: i64, reason: Option<String>) -> Result<Booking, ActionError> {
        let transition = Transition::Cancel {
            by: self.perspective,
            reason,
        };
        self.run(id, transition).await
    }

    pub fn rows(&self) -> Vec<BookingRow> {
        self.state.lock().rows.clone()
    }

    pub fn get(&self, id: i64) -> Option<BookingRow> {
        self.state.lock().rows.iter().find(|r| r.booking.id == id).cloned()
    }

    pub fn partition(&self) -> BookingPartition {
        let state = self.state.lock();
        BookingPartition::from_bookings(state.rows.iter().map(|r| &r.booking))
    }

    pub fn dismiss_error(&self, id: i64) {
        if let Some(row) = self.state.lock().row_mut(id) {
            row.error = None;
        }
    }

    async fn run(&self, id: i64, transition: Transition) -> Result<Booking, ActionError> {
        let pending = self.begin(id, &transition)?;

        match self.api.transition(id, &transition).await {
            Ok(booking) => Ok(pending.commit(booking, &transition)),
            Err(e) => {
                let err = ActionError::classify(e, Operation::Transition, transition.fallback_message());
                pending.revert(&err, &transition);
                Err(err)
            }
        }
    }

    fn begin(&self, id: i64, transition: &Transition) -> Result<Pending<'_>, ActionError> {
        let mut state = self.state.lock();

        if state.in_flight.contains(&id) {
            return Err(ActionError::conflict(format!(
                "An update to booking #{} is still in progress.",
                id
            )));
        }

        let Some(row) = state.row_mut(id) else {
            return Err(ActionError::conflict(format!(
                "Booking #{} is not on this board; reload and try again.",
                id
            )));
        };

        let from = row.booking.status;
        if !transition.is_allowed_from(from) {
            let err = ActionError::conflict(format!(
                "Booking #{} is {} and cannot move to {}.",
                id,
                from,
                transition.target()
            ));
            row.error = Some(err.clone());
            return Err(err);
        }

        let previous = row.booking.clone();
        row.booking.status = transition.target();
        row.busy = true;
        row.error = None;
        state.in_flight.insert(id);

        Ok(Pending {
            board: self,
            id,
            previous,
            settled: false,
        })
    }

    /// Put a row back to rest and release its in-flight slot.
    fn settle(&self, id: i64, booking: Booking, error: Option<ActionError>) {
        let mut state = self.state.lock();
        state.in_flight.remove(&id);
        if let Some(row) = state.row_mut(id) {
            row.booking = booking;
            row.busy = false;
            row.error = error;
        }
    }

    fn replace_rows(&self, bookings: Vec<Booking>) -> BookingPartition {
        let mut state = self.state.lock();
        let in_flight = &state.in_flight;
        // Rows with a transition in flight keep their optimistic state until
        // it settles.
        let previous: Vec<BookingRow> = state
            .rows
            .iter()
            .filter(|r| in_flight.contains(&r.booking.id))
            .cloned()
            .collect();
        state.rows = bookings
            .into_iter()
            .map(|b| {
                previous
                    .iter()
                    .find(|p| p.booking.id == b.id)
                    .cloned()
                    .unwrap_or_else(|| BookingRow::new(b))
            })
            .collect();

        tracing::debug!(count = state.rows.len(), "Booking board loaded");
        BookingPartition::from_bookings(state.rows.iter().map(|r| &r.booking))
    }
}

/// An optimistic flip waiting for the server. Dropping it unsettled, as
/// happens when the caller abandons the request, restores the row.
struct Pending<'a> {
    board: &'a BookingOrchestrator,
    id: i64,
    previous: Booking,
    settled: bool,
}

impl Pending<'_> {
    fn commit(mut self, mut confirmed: Booking, transition: &Transition) -> Booking {
        // Once assigned and out of pending, the provider never changes.
        if self.previous.status != BookingStatus::Pending {
            if let Some(locked) = self.previous.provider_id {
                if confirmed.provider_id != Some(locked) {
                    warn!(
                        booking_id = self.id,
                        locked_provider = locked,
                        reported_provider = ?confirmed.provider_id,
                        "Server reported a different provider, keeping the assigned one"
                    );
                    confirmed.provider_id = Some(locked);
                }
            }
        }

        self.settled = true;
        self.board.settle(self.id, confirmed.clone(), None);

        info!(
            booking_id = self.id,
            action = transition.name(),
            from = %self.previous.status,
            to = %confirmed.status,
            "Booking transition committed"
        );
        confirmed
    }

    fn revert(mut self, err: &ActionError, transition: &Transition) {
        warn!(
            booking_id = self.id,
            action = transition.name(),
            kind = err.kind().as_str(),
            error = %err,
            "Booking transition failed, rolling back"
        );

        self.settled = true;
        self.board
            .settle(self.id, self.previous.clone(), err.is_inline().then(|| err.clone()));
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(booking_id = self.id, "Booking transition abandoned, rolling back");
        self.board.settle(self.id, self.previous.clone(), None);
    }
}
