use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use clap::Parser;
use tokio::runtime::Handle;
use tokio::time::{Duration, Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bleq_core::config::{ConfigFile, DeviceConfig, ManagerConfig};
use bleq_core::domain::{DeviceState, EntityId, ManagerId, ReadWriteResult, StatusCode, describe_bits};
use bleq_core::impls::{JsonFileIntentStore, LogAssertions};
use bleq_core::ports::{DisconnectIntentStore, RadioBackend};
use bleq_core::tracker::{StateChange, StateListener};
use bleq_core::txn::{Transaction, TxnHandle};
use bleq_core::{Device, EntityEnv, Result, UpdateLoop};

/// Drives one simulated peripheral through connect, auth, init and disconnect.
#[derive(Debug, Parser)]
#[command(name = "bleq", version)]
struct Cli {
    /// Address of the simulated device
    #[arg(long, default_value = "C0:FF:EE:00:00:01")]
    address: String,

    /// JSON file tuning the stock manager configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remember the last disconnect intent in this JSON file
    #[arg(long)]
    intent_file: Option<PathBuf>,

    /// How long the simulated radio takes to bring a link up or down
    #[arg(long, default_value_t = 150)]
    link_delay_ms: u64,

    /// Make the initialization transaction fail
    #[arg(long)]
    fail_init: bool,

    /// Drop the link once after initialization to show a reconnect
    #[arg(long)]
    drop: bool,

    /// Debug logging (RUST_LOG wins when set)
    #[arg(short, long)]
    verbose: bool,
}

// ----------------------------------------------------------------------------
// Simulated radio
// ----------------------------------------------------------------------------

/// Answers every request after a fixed delay on the tokio runtime.
struct SimRadio {
    delay: Duration,
    runtime: Handle,
    links: Mutex<HashSet<EntityId>>,
    device: OnceLock<Weak<Device>>,
}

impl SimRadio {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            runtime: Handle::current(),
            links: Mutex::new(HashSet::new()),
            device: OnceLock::new(),
        }
    }

    fn attach(&self, device: &Arc<Device>) {
        if self.device.set(Arc::downgrade(device)).is_err() {
            warn!("radio already serves a device");
        }
    }

    fn links(&self) -> std::sync::MutexGuard<'_, HashSet<EntityId>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_link(&self, device: EntityId, up: bool) {
        if up {
            self.links().insert(device);
        } else {
            self.links().remove(&device);
        }
    }

    /// Link loss nobody asked for.
    fn drop_link(&self, device: &Device) {
        info!(device = %device.id(), "radio: link lost");
        self.set_link(device.id(), false);
        device.on_native_disconnected(StatusCode(8));
    }

    fn later(self: &Arc<Self>, job: impl FnOnce(&SimRadio, Arc<Device>) + Send + 'static) {
        let radio = Arc::clone(self);
        self.runtime.spawn(async move {
            sleep(radio.delay).await;
            if let Some(device) = radio.device.get().and_then(Weak::upgrade) {
                job(&radio, device);
            }
        });
    }
}

/// `RadioBackend` is implemented on a wrapper so callbacks can clone the `Arc`.
struct SimRadioBackend(Arc<SimRadio>);

impl RadioBackend for SimRadioBackend {
    fn connect(&self, device: EntityId) {
        info!(%device, "radio: connecting");
        self.0.later(move |radio, target| {
            radio.set_link(device, true);
            target.on_native_connected(StatusCode::SUCCESS);
        });
    }

    fn disconnect(&self, device: EntityId) {
        info!(%device, "radio: disconnecting");
        self.0.later(move |radio, target| {
            radio.set_link(device, false);
            target.on_native_disconnected(StatusCode::SUCCESS);
        });
    }

    fn is_natively_connected(&self, entity: EntityId) -> bool {
        self.0.links().contains(&entity)
    }

    fn is_natively_disconnecting(&self, _entity: EntityId) -> bool {
        false
    }

    fn enable_notifications(&self, device: EntityId) {
        info!(%device, "radio: notifications enabled");
    }

    fn cancel_server_connection(&self, server: EntityId) {
        info!(%server, "radio: server connection cancelled");
    }
}

// ----------------------------------------------------------------------------
// Demo transactions
// ----------------------------------------------------------------------------

/// A few timed "reads" and then an end report.
struct ScriptedTxn {
    name: &'static str,
    steps: u32,
    fail: bool,
    runtime: Handle,
}

impl ScriptedTxn {
    fn new(name: &'static str, steps: u32, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            steps,
            fail,
            runtime: Handle::current(),
        })
    }
}

impl Transaction for ScriptedTxn {
    fn start(&self, handle: TxnHandle) {
        let (name, steps, fail) = (self.name, self.steps, self.fail);
        self.runtime.spawn(async move {
            for step in 1..=steps {
                sleep(Duration::from_millis(100)).await;
                if !handle.is_running() {
                    return;
                }
                info!(txn = name, step, "transaction step");
            }
            if fail {
                handle.fail(Some(ReadWriteResult::failure(name, StatusCode(5))));
            } else {
                handle.succeed();
            }
        });
    }

    fn on_cancel(&self) {
        info!(txn = self.name, "transaction cancelled");
    }
}

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

struct PrintChanges;

impl StateListener<DeviceState> for PrintChanges {
    fn on_state_change(&self, change: &StateChange<DeviceState>) {
        info!(
            intent = ?change.intent,
            status = %change.status,
            now = %describe_bits::<DeviceState>(change.new_bits),
            "state"
        );
    }
}

fn setup_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_configuration(cli: &Cli) -> Result<ManagerConfig> {
    match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "loading configuration");
            let text = std::fs::read_to_string(path)?;
            Ok(ConfigFile::from_json(&text)?.into_manager_config())
        }
        None => Ok(ManagerConfig::default()),
    }
}

/// Polls until `done` holds; `false` after `limit`.
async fn wait_for(device: &Device, limit: Duration, done: impl Fn(&Device) -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if done(device) {
            return true;
        }
        sleep(Duration::from_millis(20)).await;
    }
    done(device)
}

fn settled(device: &Device) -> bool {
    device.is(DeviceState::Initialized)
        || (device.is(DeviceState::Disconnected) && device.reconnect_phase().is_none())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;
    let update_loop = UpdateLoop::new(Arc::new(LogAssertions));
    let radio = Arc::new(SimRadio::new(Duration::from_millis(cli.link_delay_ms)));
    let intent_store: Option<Arc<dyn DisconnectIntentStore>> = cli
        .intent_file
        .as_ref()
        .map(|path| Arc::new(JsonFileIntentStore::new(path)) as Arc<dyn DisconnectIntentStore>);
    let env = EntityEnv {
        manager: ManagerId::generate(),
        scheduler: update_loop.handle(),
        radio: Arc::new(SimRadioBackend(radio.clone())),
        assertions: Arc::new(LogAssertions),
        intent_store,
    };
    let running = update_loop.spawn(config.update_rate);

    let device = Device::new(
        cli.address.clone(),
        env,
        DeviceConfig::merge(&DeviceConfig::nulled(), &config.device),
    )?;
    radio.attach(&device);
    device.set_state_listener(Some(Arc::new(PrintChanges)));
    info!(
        address = device.address(),
        last_intent = ?device.last_disconnect_intent(),
        "device ready"
    );

    let limit = Duration::from_secs(30);
    device.connect(
        Some(ScriptedTxn::new("auth", 2, false)),
        Some(ScriptedTxn::new("init", 3, cli.fail_init)),
    );
    if !wait_for(&device, limit, settled).await {
        warn!("device never settled after connecting");
    }

    if cli.drop && device.is(DeviceState::Initialized) {
        radio.drop_link(&device);
        if wait_for(&device, limit, settled).await && device.is(DeviceState::Initialized) {
            info!("reconnected after link loss");
        } else {
            warn!("reconnect did not succeed");
        }
    }

    if device.is(DeviceState::Connected) {
        device.disconnect();
        let unlinked = |d: &Device| !radio.links().contains(&d.id());
        if !wait_for(&device, limit, unlinked).await {
            warn!("link still up after disconnect");
        }
    }

    info!(
        intent = ?device.last_disconnect_intent(),
        cause = ?device.last_disconnect_cause(),
        failure = ?device.last_connection_failure(),
        "finished"
    );

    if running.shutdown_and_join().await.is_none() {
        warn!("update loop did not stop cleanly");
    }
    Ok(())
}
