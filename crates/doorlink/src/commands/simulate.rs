//! `doorlink simulate`: drive the engine against an in-process controller.
//!
//! Every bus channel gets a printer, so the output is the event stream a
//! real consumer would see for the scripted scenario.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use doorlink_api::{
    CallElement, GpioElement, GroupElement, LoopbackTransport, PushEvent, RegistrationElement,
};
use doorlink_config::{SystemSecrets, load_config_or_default, profile_to_controller_config};
use doorlink_core::{
    ConnectionState, ControllerConfig, EventBus, Fleet, GpioDirection, ReconnectPolicy,
};

use crate::cli::{GlobalOpts, SimulateArgs};
use crate::error::CliError;

const STEP: Duration = Duration::from_millis(50);
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

const DOOR: &str = "100";
const LOBBY: &str = "101";
const OPERATOR: &str = "900";
const RELAY: &str = "relay1";

pub async fn handle(args: &SimulateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = simulation_config(args, global)?;
    let transport = LoopbackTransport::new();
    seed_controller(&transport);

    let bus = Arc::new(EventBus::new());
    attach_printers(&bus, args.json);

    let fleet = Fleet::with_bus(config, Arc::new(transport.clone()), Arc::clone(&bus));
    let outcome = run_scenario(&fleet, &transport).await;
    fleet.shutdown().await;
    outcome?;

    print_devices(&fleet, args.json)?;
    Ok(())
}

// ── Setup ────────────────────────────────────────────────────────────

/// Tuning comes from the active profile when one resolves; an explicit
/// `--profile` that fails to resolve is an error.
fn simulation_config(args: &SimulateArgs, global: &GlobalOpts) -> Result<ControllerConfig, CliError> {
    let cfg = load_config_or_default();
    let resolved = cfg
        .profile(global.profile.as_deref())
        .and_then(|(name, profile)| {
            profile_to_controller_config(profile, name, &cfg.defaults, &SystemSecrets)
        });

    let mut config = match resolved {
        Ok(config) => config,
        Err(e) if global.profile.is_some() => return Err(e.into()),
        Err(e) => {
            debug!(error = %e, "no usable profile; simulating with defaults");
            ControllerConfig::default()
        }
    };

    if config.operator_dirno.is_empty() {
        config.operator_dirno = OPERATOR.into();
    }
    config.reconnect = ReconnectPolicy {
        max_attempts: args.reconnect_attempts,
        initial_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(2),
    };
    Ok(config)
}

fn seed_controller(transport: &LoopbackTransport) {
    transport.set_devices(vec![
        station("10.0.0.5", DOOR, "Main entrance", "door_station"),
        station("10.0.0.6", LOBBY, "Lobby", "intercom"),
        station("10.0.0.9", OPERATOR, "Reception", "master_station"),
    ]);
    transport.set_groups(vec![GroupElement {
        id: "g1".into(),
        name: "Front desk".into(),
        members: vec![OPERATOR.into(), LOBBY.into()],
    }]);
    transport.set_gpio(
        DOOR,
        vec![
            gpio_line(RELAY, "output", "inactive"),
            gpio_line("in1", "input", "low"),
        ],
    );
}

fn station(ip: &str, dirno: &str, name: &str, device_type: &str) -> RegistrationElement {
    RegistrationElement {
        ip: ip.into(),
        dirno: dirno.into(),
        name: Some(name.into()),
        location: None,
        device_type: Some(device_type.into()),
        state: Some("registered".into()),
    }
}

fn gpio_line(id: &str, direction: &str, state: &str) -> GpioElement {
    GpioElement {
        id: id.into(),
        direction: direction.into(),
        state: state.into(),
        timestamp: None,
    }
}

fn call(state: &str) -> CallElement {
    CallElement {
        call_id: "c1".into(),
        from_dirno: DOOR.into(),
        to_dirno: OPERATOR.into(),
        to_dirno_current: None,
        call_type: Some("normal".into()),
        reason: None,
        priority: None,
        queue_position: None,
        start_time: None,
        state: state.into(),
    }
}

// ── Output ───────────────────────────────────────────────────────────

fn emit(json_mode: bool, channel: &str, text: &str, payload: &serde_json::Value) {
    if json_mode {
        println!("{}", json!({ "channel": channel, "event": payload }));
    } else {
        println!("{channel:<22} {text}");
    }
}

fn attach_printers(bus: &EventBus, json_mode: bool) {
    bus.connection_changed().subscribe(move |up| {
        let text = if *up { "connected" } else { "disconnected" };
        emit(json_mode, "connection_changed", text, &json!(up));
    });
    for channel in [
        bus.device_list_changed(),
        bus.groups_list_changed(),
        bus.queues_and_calls_sync(),
        bus.retrieval_start(),
        bus.retrieval_end(),
    ] {
        let name = channel.name();
        channel.subscribe(move |_| emit(json_mode, name, "", &serde_json::Value::Null));
    }
    bus.call_event().subscribe(move |call| {
        let text = format!("{} {} -> {} {}", call.call_id, call.from_dirno, call.to_dirno, call.state);
        let payload = serde_json::to_value(call).unwrap_or(serde_json::Value::Null);
        emit(json_mode, "call_event", &text, &payload);
    });
    bus.gpio_event().subscribe(move |event| {
        let text = format!(
            "{} {} {} = {}",
            event.dirno, event.point.direction, event.point.id, event.point.state
        );
        let payload = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        emit(json_mode, "gpio_event", &text, &payload);
    });
    bus.exception_raised().subscribe(move |err| {
        let text = err.to_string();
        emit(json_mode, "exception_raised", &text, &json!(text));
    });
    bus.diagnostic().subscribe(move |line| {
        emit(json_mode, "diagnostic", line, &json!(line));
    });
}

fn print_devices(fleet: &Fleet, json_mode: bool) -> Result<(), CliError> {
    let devices = fleet.registry().devices();
    if json_mode {
        let list: Vec<_> = devices.iter().map(Arc::as_ref).collect();
        println!("{}", serde_json::to_string(&json!({ "devices": list }))?);
        return Ok(());
    }
    println!();
    println!("DIRNO    ADDRESS      NAME             TYPE           CALL STATE");
    for device in devices.iter() {
        println!(
            "{:<8} {:<12} {:<16} {:<14} {}",
            device.dirno,
            device.address,
            device.label(),
            device.device_type,
            device.call_state
        );
    }
    Ok(())
}

// ── Scenario ─────────────────────────────────────────────────────────

async fn run_scenario(fleet: &Fleet, transport: &LoopbackTransport) -> Result<(), CliError> {
    let mut state = fleet.supervisor().subscribe_state();
    let mut devices = fleet.collections().devices();

    info!("simulation: connect");
    fleet.connect().await?;
    wait_for_state(&mut state, ConnectionState::Connected).await?;
    let pulled = tokio::time::timeout(
        RECOVERY_TIMEOUT,
        devices.wait_for(|list| list.iter().any(|d| d.dirno == DOOR)),
    )
    .await;
    match pulled {
        Ok(Some(list)) => debug!(devices = list.len(), "device list pulled"),
        Ok(None) => return Err(CliError::Internal("device store closed".into())),
        Err(_) => {
            return Err(CliError::Timeout {
                operation: "list_registered_devices".into(),
            });
        }
    }

    info!("simulation: door station rings reception");
    for step in ["ringing", "in_call"] {
        transport.push(PushEvent::Call(call(step)));
        tokio::time::sleep(STEP).await;
    }
    fleet.registry().open_door(DOOR).await?;
    transport.push(PushEvent::Call(call("ended")));
    tokio::time::sleep(STEP).await;

    info!("simulation: pulse the door relay");
    let gpio = fleet.gpio(DOOR)?;
    gpio.ready().await.map_err(|e| CliError::CommandFailed {
        operation: "gpio_refresh".into(),
        message: e.to_string(),
    })?;
    let cancel = CancellationToken::new();
    gpio.activate(RELAY, Some(Duration::from_secs(3)), &cancel)
        .await?;
    tokio::time::sleep(STEP).await;
    gpio.deactivate(RELAY, &cancel).await?;
    tokio::time::sleep(STEP).await;
    debug!(
        relay = ?gpio.point(GpioDirection::Output, RELAY).map(|p| p.state),
        "relay after pulse"
    );

    info!("simulation: drop the controller link");
    transport.drop_connection();
    wait_for_state(&mut state, ConnectionState::Disconnected).await?;
    wait_for_state(&mut state, ConnectionState::Connected).await?;
    tokio::time::sleep(STEP).await;
    Ok(())
}

async fn wait_for_state(
    state: &mut tokio::sync::watch::Receiver<ConnectionState>,
    target: ConnectionState,
) -> Result<(), CliError> {
    let reached = tokio::time::timeout(RECOVERY_TIMEOUT, state.wait_for(|s| *s == target)).await;
    match reached {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(CliError::Internal("connection state channel closed".into())),
        Err(_) => Err(CliError::ConnectionFailed {
            message: format!("not {target} within {}s", RECOVERY_TIMEOUT.as_secs()),
        }),
    }
}
