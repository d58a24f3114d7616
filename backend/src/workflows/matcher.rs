// Structural trigger filters: does this event satisfy the workflow's trigger config?

use uuid::Uuid;

use super::triggers::{TriggerConfig, TriggerData, TriggerEvent};

/// Returns true when `data` satisfies the structural part of `config`.
///
/// The trigger types must agree; beyond that every configured field must equal
/// the corresponding field on the event. Unset or blank fields match anything.
pub fn matches_trigger_config(config: &TriggerConfig, data: &TriggerData) -> bool {
    if config.trigger_type() != data.trigger_type() {
        return false;
    }

    match (config, &data.event) {
        (
            TriggerConfig::TaskCreated { assigned_to },
            TriggerEvent::TaskCreated { assigned_to: actual, .. },
        ) => uuid_matches(*assigned_to, *actual),
        (
            TriggerConfig::TaskStatusChanged { from_status, to_status },
            TriggerEvent::TaskStatusChanged {
                from_status: actual_from,
                to_status: actual_to,
                ..
            },
        ) => {
            text_matches(from_status.as_deref(), actual_from.as_deref())
                && text_matches(to_status.as_deref(), Some(actual_to))
        }
        (TriggerConfig::TaskAssigned { to_user }, TriggerEvent::TaskAssigned { to_user: actual, .. }) => {
            uuid_matches(*to_user, *actual)
        }
        (
            TriggerConfig::FileUploaded { file_type },
            TriggerEvent::FileUploaded { file_type: actual, .. },
        ) => text_matches(file_type.as_deref(), actual.as_deref()),
        (
            TriggerConfig::CustomFieldChanged { field_id },
            TriggerEvent::CustomFieldChanged { field_id: actual, .. },
        ) => uuid_matches(*field_id, Some(*actual)),
        (
            TriggerConfig::ProjectStatusChanged { to_status },
            TriggerEvent::ProjectStatusChanged { to_status: actual, .. },
        ) => text_matches(to_status.as_deref(), Some(actual)),
        // No structural filter beyond the type itself
        _ => true,
    }
}

fn text_matches(expected: Option<&str>, actual: Option<&str>) -> bool {
    match expected.map(str::trim) {
        None | Some("") => true,
        Some(expected) => actual == Some(expected),
    }
}

fn uuid_matches(expected: Option<Uuid>, actual: Option<Uuid>) -> bool {
    match expected {
        None => true,
        Some(expected) => actual == Some(expected),
    }
}
