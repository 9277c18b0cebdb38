//! Interceptor WASM Integration Tests
//!
//! Run with: wasm-pack test --headless --chrome

#![cfg(target_arch = "wasm32")]

use chameleon_wasm::interceptors::timezone::{LocalClock, LocalField};
use chameleon_wasm::profile::{synthesize, Profile};
use chameleon_wasm::stealth::{self, ApplyTrap, StealthLayer};
use chameleon_wasm::{Seed, Surface};
use js_sys::Reflect;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

const SEED: &str = "5f1c0e7a9b3d4c2e8f6a1b0c9d8e7f605142332415f6e7d8c9b0a1928374655a";

fn eval(src: &str) -> JsValue {
    js_sys::eval(src).unwrap()
}

/// Install (idempotently) and return the expected profile.
fn installed() -> Profile {
    let result = chameleon_wasm::install_identity(SEED, JsValue::UNDEFINED);
    assert!(
        Reflect::get(&result, &"error".into()).unwrap().is_undefined(),
        "install_identity returned an error"
    );
    synthesize(&Seed::from_hex(SEED).unwrap()).unwrap()
}

// ===== Install Report =====

#[wasm_bindgen_test]
fn install_is_idempotent() {
    installed();
    let result = chameleon_wasm::install_identity(SEED, JsValue::UNDEFINED);
    let report = Reflect::get(&result, &"report".into()).unwrap();
    let installed = Reflect::get(&report, &"installed".into()).unwrap();
    assert_eq!(js_sys::Array::from(&installed).length(), 0, "second install should be a no-op");
    let already = Reflect::get(&report, &"alreadyInstalled".into()).unwrap();
    assert!(js_sys::Array::from(&already).length() >= 5);
}

#[wasm_bindgen_test]
fn bad_seed_does_not_throw() {
    let result = chameleon_wasm::install_identity("not-hex", JsValue::UNDEFINED);
    let error = Reflect::get(&result, &"error".into()).unwrap();
    assert!(!error.is_undefined());
}

// ===== Navigator =====

#[wasm_bindgen_test]
fn navigator_matches_profile() {
    let profile = installed();
    assert_eq!(eval("navigator.platform").as_string().unwrap(), profile.navigator.platform);
    assert_eq!(eval("navigator.userAgent").as_string().unwrap(), profile.navigator.user_agent);
    assert_eq!(eval("navigator.language").as_string().unwrap(), profile.navigator.language);
    assert_eq!(
        eval("navigator.hardwareConcurrency").as_f64().unwrap(),
        profile.navigator.hardware_concurrency as f64
    );
}

#[wasm_bindgen_test]
fn navigator_languages_stable_and_frozen() {
    installed();
    assert_eq!(eval("navigator.languages === navigator.languages"), JsValue::TRUE);
    assert_eq!(eval("Object.isFrozen(navigator.languages)"), JsValue::TRUE);
}

#[wasm_bindgen_test]
fn navigator_instance_has_no_own_keys() {
    installed();
    assert_eq!(eval("Reflect.ownKeys(navigator).length").as_f64().unwrap(), 0.0);
}

// ===== Stealth =====

#[wasm_bindgen_test]
fn getter_looks_native() {
    installed();
    let result = eval(
        "var d = Object.getOwnPropertyDescriptor(Navigator.prototype, 'platform'); \
         d.get.toString() === 'function get platform() { [native code] }' \
         && d.get.name === 'get platform' && d.get.length === 0 \
         && d.enumerable === true && d.configurable === true",
    );
    assert_eq!(result, JsValue::TRUE, "getter should be indistinguishable from native");
}

#[wasm_bindgen_test]
fn to_string_itself_looks_native() {
    installed();
    let result = eval(
        "Function.prototype.toString.toString() === 'function toString() { [native code] }' \
         && Function.prototype.toString.call(HTMLCanvasElement.prototype.toDataURL).includes('[native code]')",
    );
    assert_eq!(result, JsValue::TRUE);
}

#[wasm_bindgen_test]
fn brand_check_still_throws() {
    installed();
    let result = eval(
        "try { Object.getOwnPropertyDescriptor(Navigator.prototype, 'platform').get.call({}); false } \
         catch (e) { e instanceof TypeError }",
    );
    assert_eq!(result, JsValue::TRUE, "foreign receivers must throw like native");
}

#[wasm_bindgen_test]
fn wrapped_function_answers_through_trap_and_looks_native() {
    installed();
    let layer = StealthLayer::new();
    let max: js_sys::Function = eval("Math.max").dyn_into().unwrap();
    let trap: ApplyTrap = Closure::wrap(Box::new(
        |_target: JsValue, _this: JsValue, _args: JsValue| -> Result<JsValue, JsValue> { Ok(JsValue::from_f64(42.0)) },
    ) as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let wrapped = layer.wrap(Surface::Navigator, &max, trap).unwrap();
    assert_eq!(wrapped.call2(&JsValue::NULL, &1.into(), &2.into()).unwrap(), JsValue::from_f64(42.0));
    assert!(stealth::verify_disguise(&max, &wrapped).is_clean());
    assert!(layer.diagnostics().is_empty());
}

// ===== Screen =====

#[wasm_bindgen_test]
fn screen_matches_profile() {
    let profile = installed();
    assert_eq!(eval("screen.width").as_f64().unwrap(), profile.screen.width as f64);
    assert_eq!(eval("screen.availHeight").as_f64().unwrap(), profile.screen.avail_height as f64);
    assert_eq!(eval("screen.colorDepth").as_f64().unwrap(), profile.screen.color_depth as f64);
    assert_eq!(eval("window.devicePixelRatio").as_f64().unwrap(), profile.screen.device_pixel_ratio);
}

// ===== Timezone =====

#[wasm_bindgen_test]
fn timezone_matches_profile() {
    let profile = installed();
    let clock = LocalClock::new(&profile.timezone).unwrap();
    assert_eq!(eval("new Date(0).getTimezoneOffset()").as_f64().unwrap(), clock.timezone_offset(0.0));
    assert_eq!(
        eval("Intl.DateTimeFormat().resolvedOptions().timeZone").as_string().unwrap(),
        profile.timezone.name
    );
    assert_eq!(eval("new Date(0).toString()").as_string().unwrap(), clock.date_time_string(0.0));
}

#[wasm_bindgen_test]
fn timezone_follows_daylight_saving() {
    let profile = installed();
    let clock = LocalClock::new(&profile.timezone).unwrap();
    // 2024-07-15T16:00:00Z and 2024-01-15T16:00:00Z
    for instant in [1_721_059_200_000.0, 1_705_334_400_000.0] {
        let date = format!("new Date({})", instant);
        assert_eq!(
            eval(&format!("{}.getTimezoneOffset()", date)).as_f64().unwrap(),
            clock.timezone_offset(instant)
        );
        assert_eq!(
            eval(&format!("{}.getHours()", date)).as_f64().unwrap(),
            clock.field(instant, LocalField::Hours)
        );
        let agrees = eval(&format!(
            "var d = {}; d.toLocaleTimeString('en-US', {{ hour: 'numeric', hour12: false }}) \
             === Intl.DateTimeFormat('en-US', {{ hour: 'numeric', hour12: false }}).format(d) \
             && Number(d.toLocaleTimeString('en-US', {{ hour: 'numeric', hourCycle: 'h23' }})) === d.getHours()",
            date
        ));
        assert_eq!(agrees, JsValue::TRUE, "Date and Intl disagree at {}", instant);
    }
}

#[wasm_bindgen_test]
fn local_constructor_and_setters_use_profile_zone() {
    installed();
    let result = eval(
        "var a = new Date(2024, 0, 1); \
         var b = new Date(2024, 6, 15, 12, 30); \
         var c = new Date(b.getTime()); c.setHours(20, 15); \
         var p = new Date('2024-07-15T12:30:00'); \
         a.getHours() === 0 && a.getDate() === 1 && a.getMonth() === 0 \
         && b.getHours() === 12 && b.getMinutes() === 30 \
         && c.getHours() === 20 && c.getMinutes() === 15 && c.getDate() === 15 \
         && p.getTime() === b.getTime() && Date.parse('2024-07-15T12:30:00') === b.getTime() \
         && Date.parse('2024-07-15') === Date.UTC(2024, 6, 15)",
    );
    assert_eq!(result, JsValue::TRUE);
}

#[wasm_bindgen_test]
fn date_constructor_still_looks_native() {
    installed();
    let result = eval(
        "Date.prototype.constructor === Date && Date.name === 'Date' && Date.length === 7 \
         && Function.prototype.toString.call(Date) === 'function Date() { [native code] }' \
         && new Date(5) instanceof Date && typeof Date() === 'string' \
         && Intl.DateTimeFormat.prototype.constructor === Intl.DateTimeFormat \
         && new Intl.DateTimeFormat() instanceof Intl.DateTimeFormat",
    );
    assert_eq!(result, JsValue::TRUE);
}

#[wasm_bindgen_test]
fn invalid_date_stays_invalid() {
    installed();
    assert_eq!(eval("String(new Date(NaN))").as_string().unwrap(), "Invalid Date");
    assert_eq!(eval("isNaN(new Date(NaN).getHours())"), JsValue::TRUE);
    assert_eq!(eval("isNaN(new Date(NaN).getTimezoneOffset())"), JsValue::TRUE);
}

// ===== Canvas =====

#[wasm_bindgen_test]
fn canvas_reads_differ_per_call() {
    installed();
    let result = eval(
        "var c = document.createElement('canvas'); c.width = 64; c.height = 32; \
         var x = c.getContext('2d'); x.fillStyle = '#3366cc'; x.fillRect(0, 0, 64, 32); \
         x.fillStyle = '#fff'; x.fillText('chameleon', 2, 20); \
         c.toDataURL() !== c.toDataURL()",
    );
    assert_eq!(result, JsValue::TRUE, "two reads should hash differently");
}

#[wasm_bindgen_test]
fn canvas_transparent_pixels_untouched() {
    installed();
    let result = eval(
        "var c = document.createElement('canvas'); c.width = 16; c.height = 16; \
         var d = c.getContext('2d').getImageData(0, 0, 16, 16).data; \
         d.every(function (v) { return v === 0; })",
    );
    assert_eq!(result, JsValue::TRUE);
}

// ===== WebGL =====

#[wasm_bindgen_test]
fn webgl_reports_profile_gpu() {
    let profile = installed();
    let has_webgl = eval("!!document.createElement('canvas').getContext('webgl')");
    if has_webgl != JsValue::TRUE {
        return;
    }
    let vendor = eval(
        "var g = document.createElement('canvas').getContext('webgl'); g.getParameter(g.VENDOR)",
    );
    assert_eq!(vendor.as_string().unwrap(), "WebKit");
    assert_eq!(
        chameleon_wasm::interceptors::webgl::live_unmasked_renderer(),
        Some(profile.webgl.renderer)
    );
}

// ===== Audio =====

#[wasm_bindgen_test]
fn audio_noise_does_not_accumulate() {
    installed();
    let max = eval(
        "var b = new AudioBuffer({ length: 256, sampleRate: 44100 }); var d; \
         for (var i = 0; i < 20; i++) { d = b.getChannelData(0); } \
         d.reduce(function (m, v) { return Math.max(m, Math.abs(v)); }, 0)",
    )
    .as_f64()
    .unwrap();
    assert!(max > 0.0, "samples should carry noise");
    assert!(max < 1.1e-6, "noise accumulated to {}", max);
}

#[wasm_bindgen_test]
fn copy_from_channel_leaves_destination_tail_alone() {
    installed();
    let tail = eval(
        "var b = new AudioBuffer({ length: 100, sampleRate: 44100 }); \
         var dest = new Float32Array(32).fill(7); \
         b.copyFromChannel(dest, 0, 90); \
         [dest.slice(0, 10).every(function (v) { return Math.abs(v) < 1e-3; }), \
          dest.slice(10).every(function (v) { return v === 7; })]",
    );
    let tail: js_sys::Array = tail.dyn_into().unwrap();
    assert_eq!(tail.get(0), JsValue::TRUE, "copied head should hold samples");
    assert_eq!(tail.get(1), JsValue::TRUE, "tail past the channel end was overwritten");
}

// ===== Self Check =====

#[wasm_bindgen_test]
fn identity_status_all_green() {
    installed();
    let status = chameleon_wasm::check_identity_status();
    for key in ["navigator", "screen", "timezone", "canvas", "audio", "antiDetection"] {
        assert_eq!(
            Reflect::get(&status, &key.into()).unwrap(),
            JsValue::TRUE,
            "{} check failed",
            key
        );
    }
}
