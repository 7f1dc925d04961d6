use anyhow::{Result, anyhow};
use tracing::{Level, debug, error, info, trace, warn};
use wasmtime::{Caller, Linker, Memory};

use super::load_context::GuestState;
use crate::context::ScriptMessage;

/// Import namespace bound to the host accessor surface
pub(crate) const HOST_MODULE: &str = "host";

/// Add all host imports to the linker
pub(crate) fn add_host_imports(linker: &mut Linker<GuestState>) -> Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        "log",
        |mut caller: Caller<'_, GuestState>, level: i32, ptr: i32, len: i32| -> Result<()> {
            let bytes = read_guest(&mut caller, ptr, len)?;
            log_message(caller.data(), level, String::from_utf8_lossy(&bytes).into_owned());
            Ok(())
        },
    )?;

    linker.func_wrap(HOST_MODULE, "event_id", |caller: Caller<'_, GuestState>| -> i32 {
        caller.data().payload().map(|p| p.event_id()).unwrap_or(-1)
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "handle",
        |caller: Caller<'_, GuestState>, slot: i32| -> i64 {
            // Handles are opaque; reinterpret the bits
            caller.data().payload().map(|p| p.handle(slot)).unwrap_or(0) as i64
        },
    )?;

    linker.func_wrap(HOST_MODULE, "spell_id", |caller: Caller<'_, GuestState>| -> i32 {
        caller.data().payload().map(|p| p.spell_id()).unwrap_or(0) as i32
    })?;

    linker.func_wrap(HOST_MODULE, "extra_data", |caller: Caller<'_, GuestState>| -> i32 {
        caller.data().payload().map(|p| p.extra_data()).unwrap_or(0) as i32
    })?;

    linker.func_wrap(
        HOST_MODULE,
        "field_len",
        |caller: Caller<'_, GuestState>, field: i32| -> i32 {
            caller
                .data()
                .payload()
                .and_then(|p| p.field(field))
                .map(|s| s.len() as i32)
                .unwrap_or(0)
        },
    )?;

    linker.func_wrap(
        HOST_MODULE,
        "field_read",
        |mut caller: Caller<'_, GuestState>, field: i32, ptr: i32, len: i32| -> Result<i32> {
            let bytes = caller
                .data()
                .payload()
                .and_then(|p| p.field(field))
                .map(|s| s.as_bytes().to_vec())
                .unwrap_or_default();
            let count = bytes.len().min(len.max(0) as usize);

            let memory = guest_memory(&mut caller)?;
            memory.write(&mut caller, ptr as u32 as usize, &bytes[..count])?;
            Ok(count as i32)
        },
    )?;

    Ok(())
}

fn guest_memory(caller: &mut Caller<'_, GuestState>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| anyhow!("module does not export its memory"))
}

fn read_guest(caller: &mut Caller<'_, GuestState>, ptr: i32, len: i32) -> Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let start = ptr as u32 as usize;
    let end = start
        .checked_add(len.max(0) as usize)
        .ok_or_else(|| anyhow!("guest string out of bounds"))?;

    memory
        .data(&*caller)
        .get(start..end)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| anyhow!("guest string {}..{} out of bounds", start, end))
}

fn log_message(state: &GuestState, level: i32, message: String) {
    let scope = state.scope();
    let level = match level {
        i32::MIN..=0 => {
            trace!(target: "quest::script", "[{}] {}", scope, message);
            Level::TRACE
        }
        1 => {
            debug!(target: "quest::script", "[{}] {}", scope, message);
            Level::DEBUG
        }
        2 => {
            info!(target: "quest::script", "[{}] {}", scope, message);
            Level::INFO
        }
        3 => {
            warn!(target: "quest::script", "[{}] {}", scope, message);
            Level::WARN
        }
        _ => {
            error!(target: "quest::script", "[{}] {}", scope, message);
            Level::ERROR
        }
    };

    if let Some(host) = state.host() {
        host.send_message(ScriptMessage {
            scope: scope.to_string(),
            level,
            message,
        });
    }
}
