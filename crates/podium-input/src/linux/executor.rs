//! uinput-based action executor for Linux.

use async_trait::async_trait;
use evdev::uinput::VirtualDevice;
use evdev::{
    AbsInfo, AbsoluteAxisCode, AttributeSet, EventType, InputEvent, KeyCode as EvdevKey,
    UinputAbsSetup,
};
use podium_types::{Action, PointerPosition};
use tracing::{debug, info, trace};

use super::keymap;
use crate::error::ActionError;
use crate::keys::key_for;
use crate::ActionExecutor;

/// Upper bound of the virtual pointer's absolute axes.
const POINTER_MAX: u16 = 32_767;

/// Presses keys on a virtual keyboard and positions a virtual absolute
/// pointer. Requires write access to `/dev/uinput`.
pub struct UinputExecutor {
    keyboard: Option<VirtualDevice>,
    pointer: Option<VirtualDevice>,
}

impl UinputExecutor {
    /// Create both virtual devices.
    pub fn new() -> Result<Self, ActionError> {
        let keyboard = build_keyboard()?;
        let pointer = build_pointer()?;
        info!("created uinput keyboard and pointer");
        Ok(Self {
            keyboard: Some(keyboard),
            pointer: Some(pointer),
        })
    }
}

fn build_keyboard() -> Result<VirtualDevice, ActionError> {
    let mut keys = AttributeSet::<EvdevKey>::new();
    for key in keymap::KEYS {
        keys.insert(keymap::host_key_to_evdev(key));
    }
    VirtualDevice::builder()
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))?
        .name("podium keyboard")
        .with_keys(&keys)
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))?
        .build()
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))
}

fn build_pointer() -> Result<VirtualDevice, ActionError> {
    let mut buttons = AttributeSet::<EvdevKey>::new();
    buttons.insert(EvdevKey::BTN_LEFT);
    let max = i32::from(POINTER_MAX);
    let abs_x = UinputAbsSetup::new(AbsoluteAxisCode::ABS_X, AbsInfo::new(0, 0, max, 0, 0, 0));
    let abs_y = UinputAbsSetup::new(AbsoluteAxisCode::ABS_Y, AbsInfo::new(0, 0, max, 0, 0, 0));

    VirtualDevice::builder()
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))?
        .name("podium pointer")
        .with_keys(&buttons)
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))?
        .with_absolute_axis(&abs_x)
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))?
        .with_absolute_axis(&abs_y)
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))?
        .build()
        .map_err(|e| ActionError::VirtualDeviceCreate(e.to_string()))
}

#[async_trait]
impl ActionExecutor for UinputExecutor {
    async fn execute(&mut self, action: Action) -> Result<(), ActionError> {
        let keyboard = self.keyboard.as_mut().ok_or(ActionError::ShutDown)?;
        let code = keymap::host_key_to_evdev(key_for(action)).0;

        // Press and release as two reports so the key repeats cleanly.
        for value in [1, 0] {
            keyboard
                .emit(&[InputEvent::new(EventType::KEY.0, code, value)])
                .map_err(|e| ActionError::Execute {
                    action,
                    reason: e.to_string(),
                })?;
        }
        debug!(%action, code, "pressed key");
        Ok(())
    }

    async fn move_pointer(&mut self, position: PointerPosition) -> Result<(), ActionError> {
        let pointer = self.pointer.as_mut().ok_or(ActionError::ShutDown)?;
        let max = i32::from(POINTER_MAX);
        let (x, y) = position.scaled(u32::from(POINTER_MAX));
        let x = i32::try_from(x).unwrap_or(max);
        let y = i32::try_from(y).unwrap_or(max);
        pointer
            .emit(&[
                InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_X.0, x),
                InputEvent::new(EventType::ABSOLUTE.0, AbsoluteAxisCode::ABS_Y.0, y),
            ])
            .map_err(|e| ActionError::Pointer(e.to_string()))?;
        trace!(x, y, "moved pointer");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ActionError> {
        self.keyboard = None;
        self.pointer = None;
        info!("destroyed uinput devices");
        Ok(())
    }
}
