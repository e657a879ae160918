use crate::codec;
use crate::command::{parse_timeout, parse_uuid, split_write_args, CommandRegistry, Invocation, Verb};
use crate::default_char::DefaultCharacteristic;
use crate::error::{Result, ShellError};
use crate::format::{self, Palette};
use crate::input::{BoxedPrinter, InputEvent, LineSource};
use crate::session::{NotifyToggle, PeripheralSession};
use crate::transport::{BleTransport, Notification};

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Line-oriented output target
pub trait Console: Send {
    fn print(&mut self, text: &str);
}

/// Shared so that whole lines from the shell and from the notification
/// listener never interleave
pub type SharedConsole = Arc<StdMutex<dyn Console>>;

fn lock(console: &SharedConsole) -> MutexGuard<'_, dyn Console + 'static> {
    console.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct StdoutConsole;

impl Console for StdoutConsole {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Prints above the line being edited, then redraws prompt and buffer
pub struct PrinterConsole {
    printer: BoxedPrinter,
}

impl PrinterConsole {
    pub fn new(printer: BoxedPrinter) -> Self {
        PrinterConsole { printer }
    }
}

impl Console for PrinterConsole {
    fn print(&mut self, text: &str) {
        if let Err(err) = self.printer.print(text.to_owned()) {
            debug!("external printer failed: {err}");
            println!("{text}");
        }
    }
}

/// Drain notifications into `console` until every sender is gone
pub fn spawn_notification_listener(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    console: SharedConsole,
    palette: Palette,
    timestamps: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ntf) = notifications.recv().await {
            let stamp = timestamps.then(|| Local::now().format("%H:%M:%S%.3f").to_string());
            let line = format::notification(&ntf, stamp.as_deref(), palette);
            lock(&console).print(&line);
        }
        debug!("notification channel closed");
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ShellConfig {
    pub scan_timeout: Duration,
    pub palette: Palette,
}

pub struct Shell<T: BleTransport> {
    session: PeripheralSession<T>,
    selection: DefaultCharacteristic,
    registry: CommandRegistry,
    config: ShellConfig,
    out: SharedConsole,
}

impl<T: BleTransport> Shell<T> {
    pub fn new(session: PeripheralSession<T>, config: ShellConfig, out: SharedConsole) -> Self {
        Shell {
            session,
            selection: DefaultCharacteristic::default(),
            registry: CommandRegistry::default(),
            config,
            out,
        }
    }

    pub fn session_mut(&mut self) -> &mut PeripheralSession<T> {
        &mut self.session
    }

    fn print(&self, text: &str) {
        lock(&self.out).print(text);
    }

    fn prompt(&self) -> String {
        let prompt = match self.session.target() {
            Some(address) if self.session.is_connected() => format!("gatt[{address}]> "),
            _ => "gatt> ".to_owned(),
        };
        self.config.palette.prompt(&prompt)
    }

    fn report_link_loss(&mut self) {
        if let Some(address) = self.session.poll_link() {
            self.selection.clear();
            self.print(&self.config.palette.error(&format!("Connection to {address} lost.")));
        }
    }

    /// Run one input line; errors are printed, never returned
    pub async fn execute(&mut self, line: &str) -> ControlFlow<()> {
        self.report_link_loss();
        let invocation = match self.registry.parse(line) {
            Ok(Some(invocation)) => invocation,
            Ok(None) => return ControlFlow::Continue(()),
            Err(err) => {
                self.print(&format::error(&err, self.config.palette));
                return ControlFlow::Continue(());
            }
        };
        debug!("dispatching {invocation:?}");
        match self.dispatch(invocation).await {
            Ok(flow) => flow,
            Err(err) => {
                self.print(&format::error(&err, self.config.palette));
                ControlFlow::Continue(())
            }
        }
    }

    async fn dispatch(&mut self, invocation: Invocation<'_>) -> Result<ControlFlow<()>> {
        let palette = self.config.palette;
        let usage = self
            .registry
            .spec(invocation.verb)
            .map(|spec| spec.usage)
            .unwrap_or_default();
        let usage_err = || ShellError::Usage(usage.to_owned());
        let args = invocation.args.as_slice();

        match invocation.verb {
            Verb::Scan => {
                let timeout = match args {
                    [] => self.config.scan_timeout,
                    [secs] => parse_timeout(secs)
                        .map_err(|reason| ShellError::Usage(format!("{usage} ({reason})")))?,
                    _ => return Err(usage_err()),
                };
                self.print(&palette.info(&format!("Scanning for {}s…", timeout.as_secs_f64())));
                let listing = format::scan_results(self.session.scan(timeout).await?, palette);
                self.print(&listing);
                self.print(&palette.success("Scan complete."));
            }
            Verb::Connect => {
                let [identifier] = args else {
                    return Err(usage_err());
                };
                self.print(&palette.info(&format!("Connecting to {identifier}…")));
                let address = self.session.connect(identifier).await?;
                self.selection.clear();
                self.print(&palette.success(&format!("Connected to {address}.")));
            }
            Verb::Disconnect => {
                let closed = self.session.disconnect().await?;
                self.selection.clear();
                if closed {
                    self.print(&palette.success("Disconnected."));
                } else {
                    self.print(&palette.info("Not connected."));
                }
            }
            Verb::Services => {
                let tree = format::service_tree(self.session.services()?, palette);
                self.print(&tree);
            }
            Verb::SetChar => {
                let [token] = args else {
                    return Err(usage_err());
                };
                let uuid = parse_uuid(token, usage)?;
                self.selection.set(&self.session, uuid)?;
                self.print(&palette.success(&format!("Default characteristic set to {uuid}")));
            }
            Verb::UnsetChar => {
                self.selection.clear();
                self.print(&palette.success("Default characteristic cleared"));
            }
            Verb::Read => {
                let explicit = args.first().map(|token| parse_uuid(token, usage)).transpose()?;
                let uuid = self.selection.resolve(&self.session, explicit)?;
                let value = self.session.read(uuid).await?;
                self.print(&palette.success(&format::read_result(&uuid, &value)));
            }
            Verb::Write => {
                // no payload is worth resolving without a link
                self.session.ensure_connected()?;
                let (explicit, data) = split_write_args(args, usage)?;
                let uuid = self.selection.resolve(&self.session, explicit)?;
                let bytes = codec::decode(data)?;
                self.session.write(uuid, &bytes).await?;
                self.print(&palette.success(&format::write_result(&uuid, &bytes)));
            }
            Verb::Notify => {
                let explicit = args.first().map(|token| parse_uuid(token, usage)).transpose()?;
                let uuid = self.selection.resolve(&self.session, explicit)?;
                let msg = match self.session.toggle_notify(uuid).await? {
                    NotifyToggle::Started => format!("Started notifications on {uuid}"),
                    NotifyToggle::Stopped => format!("Stopped notifications on {uuid}"),
                };
                self.print(&palette.success(&msg));
            }
            Verb::Help => {
                self.print(&self.registry.help_table());
            }
            Verb::Exit => return Ok(ControlFlow::Break(())),
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Prompt, read, dispatch until `exit`, end of input or a broken terminal
    pub async fn run(&mut self, input: &mut impl LineSource) {
        self.print(&self.config.palette.info("Welcome to gattsh. Type `help` for commands."));
        info!("starting shell loop");
        loop {
            self.report_link_loss();
            let prompt = self.prompt();
            let line = match input.read_line(&prompt).await {
                InputEvent::Line(line) => line,
                InputEvent::Eof | InputEvent::Interrupted => break,
                InputEvent::Failed(err) => {
                    error!("reading input: {err}");
                    break;
                }
            };
            if self.execute(&line).await.is_break() {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Disconnect if needed
    pub async fn shutdown(&mut self) {
        match self.session.disconnect().await {
            Ok(true) => self.print(&self.config.palette.success("Disconnected.")),
            Ok(false) => {}
            Err(err) => self.print(&format::error(&err, self.config.palette)),
        }
        self.selection.clear();
        self.print(&self.config.palette.info("Goodbye!"));
        info!("gattsh is exiting...");
    }
}
