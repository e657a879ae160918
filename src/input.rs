use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread;

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use log::{debug, warn};
use rustyline::error::ReadlineError;
use rustyline::{DefaultEditor, ExternalPrinter};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Line(String),
    /// Ctrl+D, or the input side went away
    Eof,
    /// Ctrl+C at the prompt
    Interrupted,
    Failed(String),
}

/// Where the shell gets its next line from
#[async_trait]
pub trait LineSource: Send {
    async fn read_line(&mut self, prompt: &str) -> InputEvent;
}

pub type BoxedPrinter = Box<dyn ExternalPrinter + Send>;

/// rustyline editor running on its own thread.
///
/// The editor blocks, so it never runs on the async runtime. Each
/// `read_line` hands the worker one prompt and awaits one event. Output
/// meant to appear while the worker sits in `readline` goes through the
/// editor's external printer so the line being typed is redrawn intact.
pub struct RustylineInput {
    prompts: Option<std_mpsc::Sender<String>>,
    events: mpsc::Receiver<InputEvent>,
    worker: Option<thread::JoinHandle<()>>,
}

impl RustylineInput {
    pub fn spawn(history: Option<PathBuf>) -> anyhow::Result<(Self, Option<BoxedPrinter>)> {
        let (prompt_tx, prompt_rx) = std_mpsc::channel::<String>();
        let (event_tx, event_rx) = mpsc::channel::<InputEvent>(1);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Option<BoxedPrinter>, String>>();

        let worker = thread::Builder::new()
            .name("readline".into())
            .spawn(move || {
                let mut editor = match DefaultEditor::new() {
                    Ok(editor) => editor,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                if let Some(path) = &history {
                    if let Err(err) = editor.load_history(path) {
                        debug!("no history loaded from {}: {err}", path.display());
                    }
                }
                let printer = match editor.create_external_printer() {
                    Ok(printer) => Some(Box::new(printer) as BoxedPrinter),
                    Err(err) => {
                        debug!("external printer unavailable: {err}");
                        None
                    }
                };
                if ready_tx.send(Ok(printer)).is_err() {
                    return;
                }

                while let Ok(prompt) = prompt_rx.recv() {
                    let event = match editor.readline(&prompt) {
                        Ok(line) => {
                            if !line.trim().is_empty() {
                                if let Err(err) = editor.add_history_entry(line.as_str()) {
                                    debug!("history entry not recorded: {err}");
                                }
                            }
                            InputEvent::Line(line)
                        }
                        Err(ReadlineError::Eof) => InputEvent::Eof,
                        Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
                        Err(err) => InputEvent::Failed(err.to_string()),
                    };
                    if event_tx.blocking_send(event).is_err() {
                        break;
                    }
                }

                if let Some(path) = &history {
                    if let Err(err) = editor.save_history(path) {
                        warn!("saving history to {}: {err}", path.display());
                    }
                }
            })
            .context("spawning readline thread")?;

        let printer = ready_rx
            .recv()
            .context("readline thread exited during setup")?
            .map_err(|err| anyhow!("line editor: {err}"))?;
        let input = RustylineInput {
            prompts: Some(prompt_tx),
            events: event_rx,
            worker: Some(worker),
        };
        Ok((input, printer))
    }

    /// Stop the worker and wait for it to save history
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.prompts.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("readline thread panicked");
            }
        }
    }
}

impl Drop for RustylineInput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl LineSource for RustylineInput {
    async fn read_line(&mut self, prompt: &str) -> InputEvent {
        let sent = self
            .prompts
            .as_ref()
            .is_some_and(|prompts| prompts.send(prompt.to_owned()).is_ok());
        if !sent {
            return InputEvent::Eof;
        }
        self.events.recv().await.unwrap_or(InputEvent::Eof)
    }
}
