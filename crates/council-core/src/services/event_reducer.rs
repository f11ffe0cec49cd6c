//! Pure state transitions for council stream events.
//!
//! [`reduce`] folds one [`CouncilEvent`] into a conversation snapshot and
//! returns the successor snapshot plus the side effects the caller has to
//! carry out (list refresh, title propagation, end of turn). Nothing here
//! performs I/O, so the whole state machine is testable without a server.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{Conversation, CouncilEvent, Message, Stage, StreamEntry};

/// How a turn ended, as far as the event feed is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// Work the reducer cannot do itself because it touches state outside the
/// conversation snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// The conversation title changed; mirror it into the summary list
    TitleChanged(String),
    /// Reload conversation summaries from the server
    RefreshSummaries,
    /// The stream is over; clear the in-flight flag
    TurnEnded(TurnOutcome),
}

#[derive(Clone, Debug)]
pub struct Reduction {
    pub snapshot: Arc<Conversation>,
    pub effects: Vec<Effect>,
}

impl Reduction {
    fn unchanged(snapshot: &Arc<Conversation>, effects: Vec<Effect>) -> Self {
        Self {
            snapshot: Arc::clone(snapshot),
            effects,
        }
    }

    fn replaced(snapshot: Conversation, effects: Vec<Effect>) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
            effects,
        }
    }
}

/// Apply one event to `snapshot`.
///
/// The input snapshot is never modified. Whenever a message changes, the
/// successor carries a freshly allocated `Arc<Message>` for it, so consumers
/// comparing by pointer see every token.
pub fn reduce(snapshot: &Arc<Conversation>, event: &CouncilEvent) -> Reduction {
    match event {
        CouncilEvent::TitleComplete { title } => Reduction::replaced(
            snapshot.with_title(title.clone()),
            vec![Effect::TitleChanged(title.clone())],
        ),
        CouncilEvent::Complete => Reduction::unchanged(
            snapshot,
            vec![Effect::RefreshSummaries, Effect::TurnEnded(TurnOutcome::Completed)],
        ),
        CouncilEvent::Cancelled => {
            Reduction::unchanged(snapshot, vec![Effect::TurnEnded(TurnOutcome::Cancelled)])
        }
        CouncilEvent::Error { message } => {
            let effects = vec![Effect::TurnEnded(TurnOutcome::Failed(message.clone()))];
            match edit_last_assistant(snapshot, |m| m.loading.clear()) {
                Some(next) => Reduction::replaced(next, effects),
                None => Reduction::unchanged(snapshot, effects),
            }
        }
        stage_event => match edit_last_assistant(snapshot, |m| apply_to_message(m, stage_event)) {
            Some(next) => Reduction::replaced(next, Vec::new()),
            None => {
                warn!(
                    conv_id = %snapshot.id(),
                    event = ?stage_event,
                    "Dropping stage event: last message is not an assistant message"
                );
                Reduction::unchanged(snapshot, Vec::new())
            }
        },
    }
}

/// Successor snapshot with the in-flight assistant message marked as stopped
/// by the user. Used by the cancellation path, not by the event feed.
pub fn finalize_stopped(snapshot: &Arc<Conversation>) -> Arc<Conversation> {
    match edit_last_assistant(snapshot, Message::finalize_stopped) {
        Some(next) => Arc::new(next),
        None => Arc::clone(snapshot),
    }
}

/// Force every loading flag of the in-flight message off without marking it
/// stopped. Used when the feed ends without a terminal event.
pub fn finalize_interrupted(snapshot: &Arc<Conversation>) -> Arc<Conversation> {
    if !snapshot.last_message().is_some_and(|m| m.loading.any()) {
        return Arc::clone(snapshot);
    }
    match edit_last_assistant(snapshot, |m| m.loading.clear()) {
        Some(next) => Arc::new(next),
        None => Arc::clone(snapshot),
    }
}

fn edit_last_assistant(
    snapshot: &Conversation,
    edit: impl FnOnce(&mut Message),
) -> Option<Conversation> {
    if !snapshot.last_message()?.is_assistant() {
        return None;
    }
    snapshot.with_last_message(edit)
}

fn apply_to_message(message: &mut Message, event: &CouncilEvent) {
    match event {
        CouncilEvent::StageStart { stage } => {
            message.loading.set(*stage, true);
            match stage {
                Stage::One => message.stage1_streaming = Default::default(),
                Stage::Two => message.stage2_streaming = Default::default(),
                Stage::Three => message.stage3_streaming = None,
            }
        }
        CouncilEvent::StageToken {
            stage,
            model,
            content,
        } => match stage {
            Stage::One => message.stage1_streaming.append_token(model, content),
            Stage::Two => message.stage2_streaming.append_token(model, content),
            Stage::Three => {
                let entry = message
                    .stage3_streaming
                    .get_or_insert_with(StreamEntry::new);
                if !entry.append(content) {
                    debug!("Ignoring synthesis token after completion");
                }
            }
        },
        CouncilEvent::ModelComplete {
            stage,
            model,
            response,
        } => match stage {
            Stage::One => message.stage1_streaming.complete(model, response),
            Stage::Two => message.stage2_streaming.complete(model, response),
            Stage::Three => match message.stage3_streaming.as_mut() {
                Some(entry) => {
                    entry.mark_complete();
                }
                None => message.stage3_streaming = Some(StreamEntry::completed(response.clone())),
            },
        },
        CouncilEvent::ModelError {
            stage,
            model,
            error,
        } => {
            debug!(stage = stage.number(), model = %model, error = %error, "Contributor failed");
            match stage {
                Stage::One => message.stage1_streaming.fail(model, error),
                Stage::Two => message.stage2_streaming.fail(model, error),
                Stage::Three => match message.stage3_streaming.as_mut() {
                    Some(entry) => {
                        entry.mark_failed(error);
                    }
                    None => message.stage3_streaming = Some(StreamEntry::failed(error)),
                },
            }
        }
        CouncilEvent::StageComplete {
            stage,
            data,
            metadata,
        } => {
            message.loading.set(*stage, false);
            let slot = match stage {
                Stage::One => &mut message.stage1_result,
                Stage::Two => &mut message.stage2_result,
                Stage::Three => &mut message.stage3_result,
            };
            if slot.is_some() {
                warn!(stage = stage.number(), "Stage result already set, keeping the first one");
                return;
            }
            *slot = Some(data.clone());
            if *stage == Stage::Two {
                message.stage2_metadata = metadata.clone();
            }
        }
        CouncilEvent::ImageAnalysisComplete { analysis } => {
            message.image_analysis = Some(analysis.clone());
        }
        CouncilEvent::TitleComplete { .. }
        | CouncilEvent::Complete
        | CouncilEvent::Error { .. }
        | CouncilEvent::Cancelled => {}
    }
}
