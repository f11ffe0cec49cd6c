use std::sync::Arc;

use council_core::controllers::DeletionPhase;
use council_core::models::StageLoading;
use council_core::repositories::StreamScript;
use council_core::{
    ClientSettings, ContextSelectionStore, CouncilEvent, CouncilSession, InMemoryCouncilApi, Stage,
    TurnMode, TurnOutcome,
};
use serde_json::json;

fn token(stage: Stage, model: &str, content: &str) -> CouncilEvent {
    CouncilEvent::StageToken {
        stage,
        model: model.to_string(),
        content: content.to_string(),
    }
}

fn canada_turn() -> Vec<CouncilEvent> {
    vec![
        CouncilEvent::StageStart { stage: Stage::One },
        token(Stage::One, "openai/gpt", "Canada is "),
        token(Stage::One, "anthropic/claude", "Start with "),
        token(Stage::One, "openai/gpt", "a good fit."),
        token(Stage::One, "anthropic/claude", "Ontario."),
        CouncilEvent::ModelComplete {
            stage: Stage::One,
            model: "openai/gpt".to_string(),
            response: "Canada is a good fit.".to_string(),
        },
        CouncilEvent::ModelComplete {
            stage: Stage::One,
            model: "anthropic/claude".to_string(),
            response: "Start with Ontario.".to_string(),
        },
        CouncilEvent::StageComplete {
            stage: Stage::One,
            data: json!([
                {"model": "openai/gpt", "response": "Canada is a good fit."},
                {"model": "anthropic/claude", "response": "Start with Ontario."}
            ]),
            metadata: None,
        },
        CouncilEvent::StageStart { stage: Stage::Two },
        token(Stage::Two, "openai/gpt", "FINAL RANKING: Response B"),
        CouncilEvent::StageComplete {
            stage: Stage::Two,
            data: json!([{"model": "openai/gpt", "ranking": "FINAL RANKING: Response B"}]),
            metadata: Some(json!({
                "label_to_model": {"Response A": "openai/gpt", "Response B": "anthropic/claude"}
            })),
        },
        CouncilEvent::StageStart { stage: Stage::Three },
        token(Stage::Three, "chairman", "Expand to Canada, "),
        token(Stage::Three, "chairman", "beginning in Ontario."),
        CouncilEvent::StageComplete {
            stage: Stage::Three,
            data: json!({"model": "chairman", "response": "Expand to Canada, beginning in Ontario."}),
            metadata: None,
        },
        CouncilEvent::TitleComplete {
            title: "Canada Expansion Strategy".to_string(),
        },
        CouncilEvent::Complete,
    ]
}

fn session(api: &InMemoryCouncilApi) -> CouncilSession {
    CouncilSession::new(
        Arc::new(api.clone()),
        ClientSettings::default(),
        ContextSelectionStore::new(),
    )
}

#[tokio::test]
async fn full_council_turn_from_temporary_conversation() {
    let api = InMemoryCouncilApi::new();
    api.push_script(StreamScript::new(canada_turn()));
    let session = session(&api);
    session.context().set_business_id(Some("northwind".to_string()));
    let mut updates = session.subscribe();

    let outcome = session
        .send_message("Should we expand to Canada?", Vec::new(), TurnMode::Council)
        .await
        .unwrap();
    assert_eq!(outcome, TurnOutcome::Completed);
    assert!(updates.has_changed().unwrap());

    let conversation = updates.borrow_and_update().clone();
    assert!(!conversation.is_temporary());
    assert_eq!(conversation.title(), "Canada Expansion Strategy");

    let reply = conversation.last_message().unwrap();
    assert_eq!(reply.loading, StageLoading::default());
    assert!(!reply.stopped);
    assert_eq!(
        reply.stage1_streaming.get("anthropic/claude").unwrap().text,
        "Start with Ontario."
    );
    assert_eq!(reply.stage1_result.as_ref().unwrap().as_array().unwrap().len(), 2);
    assert!(reply.stage2_metadata.is_some());
    assert_eq!(
        reply.synthesis_text(),
        Some("Expand to Canada, beginning in Ontario.")
    );

    let id = conversation.id().as_str().to_string();
    let stored = api.summary(&id).unwrap();
    assert_eq!(stored.title, "Canada Expansion Strategy");
    assert_eq!(stored.message_count, 2);

    let summaries = session.summaries();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, id);
    assert_eq!(summaries[0].message_count, 2);
    assert!(session.notifications().is_empty());
}

#[tokio::test]
async fn completed_conversation_can_be_starred_and_deleted() {
    let api = InMemoryCouncilApi::new();
    api.push_script(StreamScript::new(canada_turn()));
    let session = session(&api);

    session
        .send_message("Should we expand to Canada?", Vec::new(), TurnMode::Council)
        .await
        .unwrap();
    let id = session.active().id().as_str().to_string();

    session.lists().star(&id, true).await.unwrap();
    assert!(session.summaries()[0].is_starred);
    assert!(api.summary(&id).unwrap().is_starred);

    let deletion = session.lists().bulk_delete(vec![id.clone()]);
    assert!(session.summaries().is_empty());
    assert!(session.active().is_temporary());

    assert!(deletion.dismiss().await.unwrap());
    assert_eq!(deletion.phase(), DeletionPhase::Committed);
    assert!(api.summary(&id).is_none());
    assert_eq!(api.bulk_delete_calls(), vec![vec![id]]);
}
