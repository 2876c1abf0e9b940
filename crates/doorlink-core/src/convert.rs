// ── Transport-to-domain conversions ──
//
// Bridges raw `doorlink_api` elements into canonical `doorlink_core::model`
// types. Each impl trims identifiers, parses state strings into strong
// types, and fills defaults for missing optional data.

use chrono::Utc;

use doorlink_api::{GpioElement, GroupElement, RegistrationElement};

use crate::error::CoreError;
use crate::model::{
    CallElement, CallState, Device, DeviceType, GpioDirection, GpioPoint, GpioState, Group,
    Reachability,
};

// ── Helpers ────────────────────────────────────────────────────────

/// Drop empty or whitespace-only optional strings.
fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

fn parse_reachability(raw: Option<&str>) -> Reachability {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("registered" | "reachable" | "online" | "ok") => Reachability::Reachable,
        Some("unregistered" | "unreachable" | "offline" | "lost") => Reachability::Unreachable,
        _ => Reachability::Unknown,
    }
}

fn parse_device_type(raw: Option<&str>) -> DeviceType {
    raw.and_then(|s| s.trim().parse().ok())
        .unwrap_or(DeviceType::Other)
}

// ── Device ─────────────────────────────────────────────────────────

impl From<RegistrationElement> for Device {
    fn from(el: RegistrationElement) -> Self {
        let reachability = parse_reachability(el.state.as_deref());
        // A freshly announced device is idle unless the controller says it
        // cannot reach it.
        let call_state = match reachability {
            Reachability::Reachable => CallState::Reachable,
            Reachability::Unreachable => CallState::Fault,
            Reachability::Unknown => CallState::Init,
        };

        Device {
            address: el.ip.trim().to_owned(),
            dirno: el.dirno.trim().to_owned(),
            device_type: parse_device_type(el.device_type.as_deref()),
            name: non_empty(el.name),
            location: non_empty(el.location),
            reachability,
            call_state,
            updated_at: Utc::now(),
        }
    }
}

// ── Call ───────────────────────────────────────────────────────────

impl TryFrom<doorlink_api::CallElement> for CallElement {
    type Error = CoreError;

    fn try_from(el: doorlink_api::CallElement) -> Result<Self, Self::Error> {
        let state = el
            .state
            .trim()
            .parse::<CallState>()
            .map_err(|_| CoreError::Api {
                message: format!("call {} has unknown state '{}'", el.call_id, el.state),
            })?;

        Ok(CallElement {
            call_id: el.call_id,
            from_dirno: el.from_dirno.trim().to_owned(),
            to_dirno: el.to_dirno.trim().to_owned(),
            to_dirno_current: non_empty(el.to_dirno_current),
            call_type: non_empty(el.call_type),
            reason: non_empty(el.reason),
            priority: el.priority,
            queue_position: el.queue_position,
            started_at: el.start_time,
            state,
        })
    }
}

// ── GPIO ───────────────────────────────────────────────────────────

impl TryFrom<GpioElement> for GpioPoint {
    type Error = CoreError;

    fn try_from(el: GpioElement) -> Result<Self, Self::Error> {
        let direction = el
            .direction
            .trim()
            .parse::<GpioDirection>()
            .map_err(|_| CoreError::Api {
                message: format!("GPIO {} has unknown direction '{}'", el.id, el.direction),
            })?;

        Ok(GpioPoint {
            state: GpioState::from_raw(&el.state),
            id: el.id,
            direction,
            updated_at: el.timestamp.unwrap_or_else(Utc::now),
            raw_state: el.state,
        })
    }
}

// ── Group ──────────────────────────────────────────────────────────

impl From<GroupElement> for Group {
    fn from(el: GroupElement) -> Self {
        Group {
            id: el.id,
            name: el.name,
            members: el.members,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registration(state: Option<&str>) -> RegistrationElement {
        RegistrationElement {
            ip: " 10.0.0.5 ".into(),
            dirno: "100".into(),
            name: Some("  ".into()),
            location: Some("Gate A".into()),
            device_type: Some("door_station".into()),
            state: state.map(Into::into),
        }
    }

    #[test]
    fn registration_normalizes_fields() {
        let device = Device::from(registration(Some("registered")));
        assert_eq!(device.address, "10.0.0.5");
        assert_eq!(device.name, None);
        assert_eq!(device.location.as_deref(), Some("Gate A"));
        assert_eq!(device.device_type, DeviceType::DoorStation);
        assert_eq!(device.reachability, Reachability::Reachable);
        assert_eq!(device.call_state, CallState::Reachable);
    }

    #[test]
    fn unreachable_registration_is_fault() {
        let device = Device::from(registration(Some("offline")));
        assert_eq!(device.reachability, Reachability::Unreachable);
        assert_eq!(device.call_state, CallState::Fault);

        let unknown = Device::from(registration(None));
        assert_eq!(unknown.reachability, Reachability::Unknown);
        assert_eq!(unknown.call_state, CallState::Init);
    }

    #[test]
    fn unknown_device_type_falls_back_to_other() {
        let mut el = registration(None);
        el.device_type = Some("toaster".into());
        assert_eq!(Device::from(el).device_type, DeviceType::Other);
    }

    #[test]
    fn call_with_unknown_state_is_rejected() {
        let el = doorlink_api::CallElement {
            call_id: "c-9".into(),
            from_dirno: "100".into(),
            to_dirno: "200".into(),
            to_dirno_current: Some(String::new()),
            call_type: None,
            reason: None,
            priority: None,
            queue_position: None,
            start_time: None,
            state: "dialling".into(),
        };
        assert!(CallElement::try_from(el.clone()).is_err());

        let ok = CallElement::try_from(doorlink_api::CallElement {
            state: "ended".into(),
            ..el
        })
        .unwrap();
        assert_eq!(ok.state, CallState::Ended);
        assert_eq!(ok.to_dirno_current, None);
    }

    #[test]
    fn gpio_element_keeps_raw_state() {
        let point = GpioPoint::try_from(GpioElement {
            id: "relay1".into(),
            direction: "output".into(),
            state: "HIGH".into(),
            timestamp: None,
        })
        .unwrap();
        assert_eq!(point.direction, GpioDirection::Output);
        assert_eq!(point.state, GpioState::Active);
        assert_eq!(point.raw_state, "HIGH");
    }
}
