/*!
 * Ability Kernel - Main Entry Point
 *
 * Demo daemon: runs the ability manager service against an in-process
 * simulated host that acknowledges every lifecycle request.
 */

use ability_kernel::{
    init_tracing, AbilityError, AbilityManagerService, AbilityResult, AbilityScheduler, AppCall, AppScheduler,
    ApplicationInfo, BundleResolver, ComponentInfo, ComponentKind, ElementName, KernelConfig, LaunchMode,
    LifecycleState, RemoteObject, ResolvedComponent, Token, Transaction, UserId, Want,
};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DEMO_USER: UserId = 100;

/// Work the simulated host has to acknowledge
#[derive(Debug)]
enum HostMessage {
    App(AppCall),
    Ability(Token, Transaction),
}

struct SimulatedHost {
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl AppScheduler for SimulatedHost {
    fn submit(&self, call: AppCall) {
        let _ = self.tx.send(HostMessage::App(call));
    }
}

impl AbilityScheduler for SimulatedHost {
    fn schedule(&self, token: Token, transaction: Transaction) {
        let _ = self.tx.send(HostMessage::Ability(token, transaction));
    }
}

/// Resolver knowing the launcher and one demo service
struct DemoResolver {
    config: KernelConfig,
}

impl BundleResolver for DemoResolver {
    fn resolve(&self, want: &Want, _user: UserId) -> AbilityResult<ResolvedComponent> {
        let element = &want.element;
        if self.config.is_launcher(&element.bundle_name, &element.ability_name) {
            let info = ComponentInfo::new(&element.bundle_name, &element.ability_name, ComponentKind::Page)
                .with_launch_mode(LaunchMode::Singleton);
            let app = ApplicationInfo::new(&element.bundle_name, 10_000).launcher();
            return Ok(ResolvedComponent { info, app });
        }
        if element.bundle_name == "com.demo.sync" {
            let info = ComponentInfo::new(&element.bundle_name, &element.ability_name, ComponentKind::Service);
            let app = ApplicationInfo::new(&element.bundle_name, 10_001);
            return Ok(ResolvedComponent { info, app });
        }
        Err(AbilityError::ResolveFailed(element.uri()))
    }
}

/// Acknowledge one host request the way a well-behaved process would
fn acknowledge(service: &AbilityManagerService, host: &Arc<SimulatedHost>, message: HostMessage) {
    let result = match message {
        HostMessage::App(AppCall::LoadAbility { token, .. }) => {
            service.attach_ability_thread(Arc::clone(host) as Arc<dyn AbilityScheduler>, token)
        }
        HostMessage::App(AppCall::MoveToForeground { token }) => {
            service.on_ability_request_done(token, LifecycleState::Foreground)
        }
        HostMessage::App(call) => {
            info!(?call, "host call");
            Ok(())
        }
        HostMessage::Ability(token, Transaction::Lifecycle { target, .. }) => service.transition_done(token, target),
        HostMessage::Ability(token, Transaction::Connect { .. }) => {
            service.schedule_connect_done(token, Some(RemoteObject(token.as_uuid().as_u64_pair().0)))
        }
        HostMessage::Ability(token, Transaction::Disconnect { .. }) => service.schedule_disconnect_done(token),
        HostMessage::Ability(token, Transaction::Command { .. }) => service.schedule_command_done(token),
    };
    if let Err(e) = result {
        warn!(error = %e, "host acknowledgement rejected");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    info!("Ability kernel starting...");
    let config = KernelConfig::from_env();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let host = Arc::new(SimulatedHost { tx });

    let service = Arc::new(
        AbilityManagerService::builder()
            .with_config(config.clone())
            .with_app_scheduler(Arc::clone(&host) as Arc<dyn AppScheduler>)
            .with_resolver(Arc::new(DemoResolver { config }))
            .with_user(DEMO_USER)
            .build()?,
    );

    let events = service.bus().subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            info!(user = event.user, record = %event.record, uri = %event.uri, kind = ?event.kind, "lifecycle event");
        }
    });

    let outcome = service.start_launcher(DEMO_USER)?;
    info!(?outcome, "launcher start submitted");
    let sync = Want::new(ElementName::new("com.demo.sync", "SyncService"));
    let code = service.start_ability_code(&sync, None, -1);
    info!(code, "demo service start submitted");

    info!("Ability kernel ready, press Ctrl+C to stop");
    loop {
        tokio::select! {
            Some(message) = rx.recv() => acknowledge(&service, &host, message),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down...");
    for line in service.dump() {
        info!("{}", line);
    }
    service.shutdown().await;
    event_task.abort();
    Ok(())
}
