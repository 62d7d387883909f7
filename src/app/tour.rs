//! Tour progression engine.
//!
//! Decides when a round's contributions are complete, advances the rotation
//! index exactly once, and creates the payout transfer. The advance itself
//! is a compare-and-swap on `sols.current_tour`, so two validations racing
//! on the last missing payment cannot double-advance a round: the loser
//! observes no row change and reports [`TourOutcome::AlreadyAdvanced`].

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{AppError, Database, DatabaseError, SolStatus, TourOutcome};

pub struct TourEngine {
    db: Arc<dyn Database>,
}

impl TourEngine {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Run the completion check for a sol's current tour and advance the
    /// rotation if every participant's contribution is validated.
    ///
    /// Safe to call after every validation, including concurrently.
    #[instrument(skip(self))]
    pub async fn check_and_advance(&self, sol_id: Uuid) -> Result<TourOutcome, AppError> {
        let sol = self
            .db
            .get_sol(sol_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(sol_id.to_string())))?;

        if sol.status != SolStatus::Active {
            // Validations can land on a sol that just completed; nothing to do.
            return Ok(TourOutcome::AlreadyAdvanced);
        }

        let tour = sol.current_tour;
        let participant_count = self.db.count_participants(sol_id).await?;
        let validated = self.db.count_validated_payments(sol_id, tour).await?;

        if validated < participant_count {
            return Ok(TourOutcome::NotComplete {
                missing: participant_count - validated,
            });
        }

        let participants = self.db.list_participants(sol_id).await?;
        let beneficiary = participants
            .iter()
            .find(|p| p.rotation_order == tour)
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "sol {sol_id} tour {tour} has no participant at that rotation order"
                ))
            })?;

        // The CAS: only one concurrent caller gets to create the transfer.
        if !self.db.advance_tour(sol_id, tour).await? {
            info!(%sol_id, tour, "tour already advanced by a concurrent validation");
            return Ok(TourOutcome::AlreadyAdvanced);
        }

        let completed = self.db.complete_tour_payments(sol_id, tour).await?;
        if completed != participant_count as u64 {
            // Not fatal: a payment may have been completed by hand. Log it.
            warn!(
                %sol_id,
                tour,
                completed,
                expected = participant_count,
                "unexpected number of payments completed at tour close"
            );
        }

        let pot = sol.pot_for(participant_count);
        let transfer = self
            .db
            .create_transfer(sol_id, tour, beneficiary.user_id, pot)
            .await?;

        let sol_completed = tour >= sol.max_participants || tour as i64 >= participant_count;

        info!(
            %sol_id,
            tour,
            beneficiary = %beneficiary.user_id,
            amount = pot,
            sol_completed,
            "tour advanced, payout transfer created"
        );
        metrics::counter!("tours_advanced_total").increment(1);

        Ok(TourOutcome::Advanced {
            transfer,
            sol_completed,
        })
    }
}
