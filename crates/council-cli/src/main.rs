use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use council_core::models::AttachmentFile;
use council_core::settings::{ClientSettingsJsonRepository, ClientSettingsRepository};
use council_core::{
    ContextSelectionStore, Conversation, CouncilSession, HttpCouncilApi, Message, Stage,
    TurnMode, TurnOutcome,
};
use tracing::{Level, debug, info};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Council,
    Chat,
}

impl From<ModeArg> for TurnMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Council => TurnMode::Council,
            ModeArg::Chat => TurnMode::Chat,
        }
    }
}

/// Ask the model council a question and stream its answer.
#[derive(Debug, Parser)]
#[command(name = "council", version)]
struct Args {
    /// The question to put to the council
    question: String,

    /// Full three-stage council or single-model chat
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Backend address, overriding settings.json
    #[arg(long, env = "COUNCIL_BASE_URL")]
    base_url: Option<String>,

    /// Business context to scope the answer to
    #[arg(long)]
    business: Option<String>,

    /// Files to attach (repeatable)
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,

    /// Continue an existing conversation instead of starting a new one
    #[arg(long)]
    conversation: Option<String>,
}

/// Writes stage progress to stderr and the synthesis to stdout as it grows.
#[derive(Default)]
struct Renderer {
    announced: [bool; 3],
    printed: usize,
}

impl Renderer {
    fn render(&mut self, conversation: &Conversation) {
        let Some(reply) = conversation.last_message().filter(|m| m.is_assistant()) else {
            return;
        };

        for stage in Stage::ALL {
            let slot = usize::from(stage.number() - 1);
            if reply.loading.get(stage) && !self.announced[slot] {
                self.announced[slot] = true;
                eprintln!("{}", stage_label(stage));
            }
        }

        if let Some(text) = reply.synthesis_text()
            && text.len() > self.printed
            && text.is_char_boundary(self.printed)
        {
            print!("{}", &text[self.printed..]);
            let _ = std::io::stdout().flush();
            self.printed = text.len();
        }
    }

    fn finish(&self, conversation: &Conversation) {
        if self.printed > 0 {
            println!();
        }
        if let Some(reply) = conversation.last_message() {
            for line in contributor_summary(reply) {
                eprintln!("{}", line);
            }
        }
    }
}

/// Which Stage 1 contributors answered and which failed.
fn contributor_summary(reply: &Message) -> Vec<String> {
    let mut lines = Vec::new();
    let answered = reply.stage1_streaming.succeeded();
    if !answered.is_empty() {
        lines.push(format!("Council members: {}", answered.join(", ")));
    }
    let failed = reply.stage1_streaming.failed();
    if !failed.is_empty() {
        lines.push(format!("Models that did not answer: {}", failed.join(", ")));
    }
    lines
}

fn stage_label(stage: Stage) -> &'static str {
    match stage {
        Stage::One => "Stage 1: collecting individual responses...",
        Stage::Two => "Stage 2: peer review...",
        Stage::Three => "Stage 3: chairman synthesis...",
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let repository = ClientSettingsJsonRepository::new().context("Failed to locate settings")?;
    let mut settings = repository
        .load()
        .await
        .with_context(|| format!("Failed to load {}", repository.path().display()))?;
    if let Some(base_url) = args.base_url {
        settings.base_url = base_url;
    }
    let mode = args.mode.map(TurnMode::from).unwrap_or(settings.default_mode);
    info!(base_url = %settings.base_url, mode = ?mode, "Starting council client");

    let api = HttpCouncilApi::from_settings(&settings).context("Failed to build HTTP client")?;
    let context = ContextSelectionStore::new();
    context.set_business_id(args.business);
    let session = CouncilSession::new(Arc::new(api), settings, context);

    if let Some(id) = &args.conversation {
        session
            .open_conversation(id)
            .await
            .with_context(|| format!("Failed to open conversation {}", id))?;
    }

    let mut attachments = Vec::with_capacity(args.attachments.len());
    for path in &args.attachments {
        let file = AttachmentFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        attachments.push(file);
    }

    tokio::spawn({
        let session = session.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupt received");
                session.stop_generation();
            }
        }
    });

    let mut renderer = Renderer::default();
    let mut updates = session.subscribe();
    let turn = session.send_message(&args.question, attachments, mode);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome?,
            changed = updates.changed() => match changed {
                Ok(()) => renderer.render(&updates.borrow_and_update()),
                Err(_) => break (&mut turn).await?,
            },
        }
    };

    let conversation = session.active();
    renderer.render(&conversation);
    renderer.finish(&conversation);

    match outcome {
        TurnOutcome::Completed => {
            eprintln!(
                "Conversation {} \"{}\"",
                conversation.id(),
                conversation.title()
            );
            Ok(())
        }
        TurnOutcome::Cancelled => {
            eprintln!("Stopped.");
            Ok(())
        }
        TurnOutcome::Failed(message) => bail!("The council could not answer: {}", message),
    }
}
