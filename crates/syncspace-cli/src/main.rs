mod config;

use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use syncspace_canvas::{
    Canvas, CanvasExport, CanvasSession, CanvasStore, ConnectionStatus, InitOutcome,
    LocalIdentity, LoopbackProvider, LoopbackRoom, PopColor,
};
use syncspace_ideas::{CannedBackend, IdeaRequest, IdeaService, apply_ideas};

use crate::config::Config;

#[derive(Parser)]
#[command(version, about = "SyncSpace - collaborative canvas tools", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a TOML config file (defaults to ./syncspace.toml if present)
    #[arg(long, env = "SYNCSPACE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run two replicas in an in-process room and print the converged canvas
    Simulate {
        /// Room name
        #[arg(long, default_value = "demo")]
        room: String,
    },
    /// Turn model output into ideas branching from a note
    Ideas {
        /// Content of the note to expand
        note: String,

        /// File holding the raw model response ("-" for stdin)
        #[arg(long, default_value = "-")]
        response: PathBuf,

        /// Client key used for rate limiting
        #[arg(long, default_value = "cli")]
        client: String,
    },
    /// Load a canvas export and print what it contains
    Import {
        /// Path to an exported canvas JSON file
        file: PathBuf,
    },
}

type Session = CanvasSession<LoopbackProvider>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_miette();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate { room } => simulate(&room, &config),
        Commands::Ideas {
            note,
            response,
            client,
        } => ideas(note, response, &client, &config).await,
        Commands::Import { file } => import(file),
    }
}

fn join(room: &LoopbackRoom, name: &str, config: &Config) -> Result<Session> {
    let session = Session::with_undo_config(
        LocalIdentity {
            name: name.into(),
            color: PopColor::Yellow,
        },
        config.undo,
    );
    match session.init(&room.name(), |_| room.connect()) {
        InitOutcome::Started => Ok(session),
        other => Err(miette::miette!("{name} could not join the room: {other:?}")),
    }
}

fn settle(sessions: &[&Session]) -> Result<()> {
    for _ in 0..16 {
        if sessions.iter().map(|s| s.pump()).sum::<usize>() == 0 {
            return Ok(());
        }
    }
    Err(miette::miette!("replicas did not settle"))
}

fn simulate(room_name: &str, config: &Config) -> Result<()> {
    let room = LoopbackRoom::new(room_name);
    let alice = join(&room, "Neon Fox", config)?;
    let bob = join(&room, "Turbo Owl", config)?;
    settle(&[&alice, &bob])?;

    println!("→ Alice adds two notes and connects them");
    let canvas = alice.canvas();
    let n1 = canvas.add_note_with_content(0.0, 0.0, PopColor::Yellow, "Plan the launch");
    let n2 = canvas.add_note_with_content(240.0, 0.0, PopColor::Blue, "Book a venue");
    canvas.add_edge(&n1, &n2);
    settle(&[&alice, &bob])?;

    println!("→ Bob loses the connection and edits offline");
    let bob_id = bob
        .connection_id()
        .ok_or_else(|| miette::miette!("bob is not connected"))?;
    room.interrupt(bob_id);
    bob.pump();
    bob.canvas().update_note_content(&n2, "Book a venue for 50 people");
    bob.canvas().update_note_color(&n2, PopColor::Green);
    if bob.connection_status() != ConnectionStatus::Reconnecting {
        tracing::warn!(status = %bob.connection_status().as_str(), "unexpected status while offline");
    }

    println!("→ Alice deletes the first note");
    canvas.delete_note(&n1);

    room.resume(bob_id);
    settle(&[&alice, &bob])?;

    let left = alice.canvas().snapshot();
    let right = bob.canvas().snapshot();
    if left != right {
        return Err(miette::miette!("replicas diverged"));
    }
    println!(
        "✓ Converged: {} note(s), {} edge(s)",
        left.notes.len(),
        left.edges.len()
    );

    let export = CanvasExport::capture(&bob.canvas());
    println!("{}", export.to_json_pretty().into_diagnostic()?);

    alice.teardown();
    bob.teardown();
    Ok(())
}

async fn ideas(note: String, response: PathBuf, client: &str, config: &Config) -> Result<()> {
    let text = if response.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).into_diagnostic()?;
        buf
    } else {
        std::fs::read_to_string(&response).into_diagnostic()?
    };

    let canvas = Canvas::new(CanvasStore::new());
    let parent = canvas.add_note_with_content(0.0, 0.0, PopColor::Yellow, &note);
    let request = IdeaRequest::for_note(&canvas, &parent).ok_or_else(|| {
        miette::miette!("Type something in the note first, then ask for ideas!")
    })?;

    let mut service = IdeaService::new(CannedBackend::new(text), config.ideas);
    let generated = service.generate(client, &request).await.into_diagnostic()?;
    if generated.ideas.fallback_count > 0 {
        println!(
            "⚠ {} idea(s) came from the fallback",
            generated.ideas.fallback_count
        );
    }

    let children = apply_ideas(&canvas, &parent, &generated.ideas.ideas);
    for child in &children {
        println!("• {}", canvas.note_content(child));
    }

    let export = CanvasExport::capture(&canvas);
    println!("{}", export.to_json_pretty().into_diagnostic()?);
    Ok(())
}

fn import(file: PathBuf) -> Result<()> {
    let json = std::fs::read_to_string(&file).into_diagnostic()?;
    let export = CanvasExport::from_json(&json).into_diagnostic()?;

    let canvas = Canvas::new(CanvasStore::new());
    let summary = export.import_into(&canvas);
    println!(
        "✓ Imported {} note(s) and {} edge(s) from {}",
        summary.notes_added,
        summary.edges_added,
        file.display()
    );
    for view in canvas.notes_with_content() {
        println!(
            "• [{}] ({}, {}) {}",
            view.note.color.as_str(),
            view.note.x,
            view.note.y,
            view.content
        );
    }
    Ok(())
}

fn init_miette() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .build(),
        )
    }))
    .expect("couldn't set the miette hook");
    miette::set_panic_hook();
}
