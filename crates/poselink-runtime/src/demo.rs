//! Loopback demo: a manager, a scripted provider walking the viewer in a
//! circle, and two augmenters (one subscribed to an extra beacon entity),
//! all wired over in-process channels.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use glam::{DQuat, DVec3};

use poselink_core::topics;
use poselink_core::types::{FrameRef, PeerRole, SessionConfig};
use poselink_core::wire::SerializedPose;
use poselink_reality::{ProviderDescriptor, ProviderHandler, RealityError, SelectorConfig};
use poselink_runtime::{AugmenterRuntime, ManagerRuntime};
use poselink_session::{MessageChannel, SessionPort, loopback_pair};
use poselink_sync::{FrameState, SyncConfig};

#[derive(clap::Args)]
pub struct DemoOpts {
    /// Number of simulated ticks
    #[arg(long, default_value = "30")]
    pub ticks: u64,

    /// Milliseconds between ticks
    #[arg(long, default_value = "33")]
    pub interval_ms: u64,
}

/// Provider handler that opens a viewer-role session and hands the port
/// back to the demo loop, which scripts the frame states.
struct ScriptedProvider {
    ports: Rc<RefCell<Vec<SessionPort>>>,
}

impl ProviderHandler for ScriptedProvider {
    fn connect(
        &mut self,
        _descriptor: &ProviderDescriptor,
        endpoint: Box<dyn MessageChannel>,
    ) -> Result<(), RealityError> {
        let mut port = SessionPort::new();
        port.open(endpoint, SessionConfig::new(PeerRole::Viewer))?;
        self.ports.borrow_mut().push(port);
        Ok(())
    }
}

fn fixed_pose(position: DVec3) -> SerializedPose {
    SerializedPose::new(position, DQuat::IDENTITY, FrameRef::Fixed)
}

pub async fn run(opts: DemoOpts) -> anyhow::Result<()> {
    let provider_ports: Rc<RefCell<Vec<SessionPort>>> = Rc::default();

    let mut manager = ManagerRuntime::new(
        SyncConfig::default(),
        SelectorConfig {
            default_provider: Some(ProviderDescriptor::new("scripted")),
            ..SelectorConfig::default()
        },
    );
    manager.register_provider(
        "scripted",
        Box::new(ScriptedProvider {
            ports: Rc::clone(&provider_ports),
        }),
    );

    let mut walker = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    manager.attach_peer(Box::new(far))?;
    walker.connect(Box::new(near), SessionConfig::new(PeerRole::Augmenter))?;

    let mut observer = AugmenterRuntime::new(SyncConfig::default());
    let (near, far) = loopback_pair();
    manager.attach_peer(Box::new(far))?;
    observer.connect(Box::new(near), SessionConfig::new(PeerRole::Augmenter))?;
    let _subscription = observer.subscribe("beacon");

    manager.start()?;
    tracing::info!(ticks = opts.ticks, "demo starting");

    for tick in 0..opts.ticks {
        let time = tick as f64 * opts.interval_ms as f64 / 1000.0;

        // Scripted provider: viewer circling the origin, one fixed beacon.
        {
            let mut ports = provider_ports.borrow_mut();
            if let Some(port) = ports.last_mut() {
                port.pump();
                if port.is_connected() {
                    let state = FrameState::new(tick, time)
                        .with_entity(
                            "user",
                            fixed_pose(DVec3::new(2.0 * time.sin(), 0.0, 2.0 * time.cos())),
                        )
                        .with_entity("beacon", fixed_pose(DVec3::new(5.0, 1.0, 0.0)));
                    port.send(topics::REALITY_FRAME_STATE, serde_json::to_value(&state)?);
                }
            }
        }

        manager.tick()?;
        walker.tick();
        observer.tick();

        if let Some(beacon) =
            observer
                .graph()
                .resolve_position("beacon", observer.synchronizer().time(), &FrameRef::Fixed)
        {
            tracing::info!(
                tick,
                x = beacon.x,
                y = beacon.y,
                z = beacon.z,
                "observer sees beacon"
            );
        }

        tokio::time::sleep(Duration::from_millis(opts.interval_ms)).await;
    }

    tracing::info!(
        provider = %manager.selector_state(),
        peers = manager.peer_count(),
        "demo finished"
    );
    Ok(())
}
