//! Calculator Vault - Android JNI Bindings
//!
//! Exposes the vault to the Kotlin host app. Batches and records cross the
//! boundary as JSON.

#![cfg(feature = "android")]

use std::ptr;
use std::sync::Arc;

use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use log::warn;
use parking_lot::Mutex;

use crate::coordinator::BatchRequest;
use crate::vault::CalculatorVault;

// Global vault instance (singleton for Android)
static VAULT: Mutex<Option<Arc<CalculatorVault>>> = Mutex::new(None);

fn current_vault() -> Option<Arc<CalculatorVault>> {
    VAULT.lock().clone()
}

fn read_string(env: &mut JNIEnv, value: &JString) -> Option<String> {
    env.get_string(value).ok().map(Into::into)
}

fn new_jstring(env: &mut JNIEnv, value: &str) -> jstring {
    env.new_string(value)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn to_jboolean(ok: bool) -> jboolean {
    if ok {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// Open (or create) the vault in the app's private data directory
#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_open(
    mut env: JNIEnv,
    _class: JClass,
    data_dir: JString,
) -> jboolean {
    let Some(data_dir) = read_string(&mut env, &data_dir) else {
        return JNI_FALSE;
    };

    match CalculatorVault::open_in(&data_dir) {
        Ok(vault) => {
            *VAULT.lock() = Some(Arc::new(vault));
            JNI_TRUE
        }
        Err(e) => {
            warn!("Could not open vault in {}: {}", data_dir, e);
            JNI_FALSE
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_hasPasscode(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    to_jboolean(current_vault().map_or(false, |v| v.is_set_up()))
}

#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_setPasscode(
    mut env: JNIEnv,
    _class: JClass,
    passcode: JString,
) -> jboolean {
    let (Some(vault), Some(passcode)) = (current_vault(), read_string(&mut env, &passcode)) else {
        return JNI_FALSE;
    };
    to_jboolean(vault.set_passcode(&passcode).is_ok())
}

/// Unlock with the passcode entered on the calculator display
#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_unlock(
    mut env: JNIEnv,
    _class: JClass,
    passcode: JString,
) -> jboolean {
    let (Some(vault), Some(passcode)) = (current_vault(), read_string(&mut env, &passcode)) else {
        return JNI_FALSE;
    };
    to_jboolean(vault.unlock(&passcode).is_ok())
}

#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_lock(
    _env: JNIEnv,
    _class: JClass,
) {
    if let Some(vault) = current_vault() {
        vault.lock();
    }
}

#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_isUnlocked(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    to_jboolean(current_vault().map_or(false, |v| v.is_unlocked()))
}

/// Run a JSON `BatchRequest`; returns the JSON `BatchReport`, or null when
/// the request is malformed or the vault is locked
#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_executeBatch(
    mut env: JNIEnv,
    _class: JClass,
    request_json: JString,
) -> jstring {
    let (Some(vault), Some(json)) = (current_vault(), read_string(&mut env, &request_json)) else {
        return ptr::null_mut();
    };

    let request: BatchRequest = match serde_json::from_str(&json) {
        Ok(request) => request,
        Err(e) => {
            warn!("Malformed batch request: {}", e);
            return ptr::null_mut();
        }
    };

    let report = match vault.execute(&request) {
        Ok(report) => report,
        Err(e) => {
            warn!("Batch rejected: {}", e);
            return ptr::null_mut();
        }
    };

    match serde_json::to_string(&report) {
        Ok(json) => new_jstring(&mut env, &json),
        Err(_) => ptr::null_mut(),
    }
}

/// All registry records as a JSON array, or null when locked
#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_listRecords(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let records = match current_vault().map(|v| v.records()) {
        Some(Ok(records)) => records,
        _ => return ptr::null_mut(),
    };

    match serde_json::to_string(&records) {
        Ok(json) => new_jstring(&mut env, &json),
        Err(_) => ptr::null_mut(),
    }
}

#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_setCustomKey(
    mut env: JNIEnv,
    _class: JClass,
    passphrase: JString,
) -> jboolean {
    let (Some(vault), Some(passphrase)) = (current_vault(), read_string(&mut env, &passphrase))
    else {
        return JNI_FALSE;
    };
    to_jboolean(vault.set_custom_key(&passphrase).is_ok())
}

#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_clearCustomKey(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    to_jboolean(current_vault().map_or(false, |v| v.clear_custom_key().is_ok()))
}

/// Decrypted preview path for a hidden file, or null
#[no_mangle]
pub extern "system" fn Java_com_example_calculator_vault_NativeVault_openPreview(
    mut env: JNIEnv,
    _class: JClass,
    path: JString,
) -> jstring {
    let (Some(vault), Some(path)) = (current_vault(), read_string(&mut env, &path)) else {
        return ptr::null_mut();
    };

    match vault.open_preview(std::path::Path::new(&path)) {
        Ok(preview) => new_jstring(&mut env, &preview.to_string_lossy()),
        Err(e) => {
            warn!("Preview failed for {}: {}", path, e);
            ptr::null_mut()
        }
    }
}
