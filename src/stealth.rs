//! Disguise layer for installed overrides.
//!
//! Methods and accessors are never replaced by bare closures. Each override is
//! a `Proxy` around the native function with an `apply` trap, so `name`,
//! `length`, own keys and the prototype chain are the native ones by
//! construction. `Function.prototype.toString` is itself proxied once per page
//! and answers for every registered proxy with the source text of its target.
//! Property descriptors are re-created with the native `enumerable` and
//! `configurable` flags.
//!
//! When a disguise primitive is missing the override is still installed as a
//! plain function and the surface is recorded as degraded.

use std::cell::RefCell;

use js_sys::{Array, Function, Object, Reflect, WeakMap};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::error::ChameleonError;
use crate::surface::Surface;

/// `apply` trap: `(target, thisArg, argumentsList)`.
pub type ApplyTrap = Closure<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>;

/// Computes a getter's value for a receiver that passed the native brand check.
pub type GetterFn = Box<dyn Fn(&JsValue) -> Result<JsValue, JsValue>>;

thread_local! {
    /// proxy -> native target, consulted by the `toString` proxy.
    static MASKS: RefCell<Option<WeakMap>> = const { RefCell::new(None) };
}

/// What kind of slot a binding replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingKind {
    Method,
    Getter,
    Constructor,
}

/// One native slot paired with its override. Lives as long as the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub surface: Surface,
    /// e.g. `HTMLCanvasElement.prototype`
    pub owner: String,
    pub property: String,
    pub kind: BindingKind,
    pub disguised: bool,
}

/// Result of introspecting an override the way a tracking script would.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisguiseCheck {
    pub native_to_string: bool,
    pub name_matches: bool,
    pub length_matches: bool,
    pub own_keys_match: bool,
    pub prototype_matches: bool,
}

impl DisguiseCheck {
    pub fn is_clean(&self) -> bool {
        self.native_to_string
            && self.name_matches
            && self.length_matches
            && self.own_keys_match
            && self.prototype_matches
    }
}

/// Installs disguised overrides and collects degradation diagnostics.
pub struct StealthLayer {
    diagnostics: RefCell<Vec<ChameleonError>>,
}

impl StealthLayer {
    /// Prepare the layer, proxying `Function.prototype.toString` if this
    /// page has not been prepared yet.
    pub fn new() -> Self {
        if let Err(e) = ensure_to_string_mask() {
            log::warn!("⚠️ toString mask unavailable: {:?}", e);
        }
        Self {
            diagnostics: RefCell::new(Vec::new()),
        }
    }

    /// Wrap `original` so calls go through `trap` while every introspection
    /// path still sees `original`. Without a working disguise the wrapper is a
    /// plain forwarding function and `surface` is recorded as degraded.
    pub fn wrap(&self, surface: Surface, original: &Function, trap: ApplyTrap) -> Result<Function, JsValue> {
        let label = String::from(original.name());
        let (wrapped, _) = self.disguise(surface, &label, original, &into_function(trap))?;
        Ok(wrapped.unchecked_into())
    }

    /// Replace method `name` on `target` with a disguised proxy around the
    /// current value.
    pub fn override_method(
        &self,
        surface: Surface,
        owner: &str,
        target: &JsValue,
        name: &str,
        trap: ApplyTrap,
    ) -> Result<Binding, JsValue> {
        let target_obj: &Object = target.unchecked_ref();
        let key = JsValue::from_str(name);
        let original: Function = Reflect::get(target, &key)?
            .dyn_into()
            .map_err(|_| JsValue::from_str(&format!("{}.{} is not a function", owner, name)))?;
        let descriptor = Reflect::get_own_property_descriptor(target_obj, &key)?;

        let label = format!("{}.{}", owner, name);
        let (replacement, disguised) = self.disguise(surface, &label, &original, &into_function(trap))?;

        let attrs = Object::new();
        Reflect::set(&attrs, &"value".into(), &replacement)?;
        copy_flag(&descriptor, &attrs, "writable", true)?;
        copy_flag(&descriptor, &attrs, "enumerable", true)?;
        copy_flag(&descriptor, &attrs, "configurable", true)?;
        define(target_obj, &key, &attrs, &label)?;

        Ok(Binding {
            surface,
            owner: owner.to_string(),
            property: name.to_string(),
            kind: BindingKind::Method,
            disguised,
        })
    }

    /// Replace accessor `name` on `target`. The native getter still runs
    /// first so receivers that fail its brand check throw natively.
    pub fn override_getter(
        &self,
        surface: Surface,
        owner: &str,
        target: &JsValue,
        name: &str,
        value: GetterFn,
    ) -> Result<Binding, JsValue> {
        let target_obj: &Object = target.unchecked_ref();
        let key = JsValue::from_str(name);
        let label = format!("{}.{}", owner, name);
        let descriptor = Reflect::get_own_property_descriptor(target_obj, &key)?;
        let native_get = if descriptor.is_undefined() {
            None
        } else {
            Reflect::get(&descriptor, &"get".into())?.dyn_into::<Function>().ok()
        };

        let trap: ApplyTrap = Closure::wrap(Box::new(
            move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
                if let Some(native) = target.dyn_ref::<Function>() {
                    Reflect::apply(native, &this_arg, args.unchecked_ref())?;
                }
                value(&this_arg)
            },
        )
            as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);
        let trap_fn = into_function(trap);

        let (getter, disguised) = match &native_get {
            Some(native) => self.disguise(surface, &label, native, &trap_fn)?,
            None => {
                self.degrade(surface, &format!("{} has no native getter", label));
                (forwarder(&JsValue::UNDEFINED, &trap_fn)?, false)
            }
        };

        let attrs = Object::new();
        Reflect::set(&attrs, &"get".into(), &getter)?;
        if !descriptor.is_undefined() {
            let setter = Reflect::get(&descriptor, &"set".into())?;
            if !setter.is_undefined() {
                Reflect::set(&attrs, &"set".into(), &setter)?;
            }
        }
        copy_flag(&descriptor, &attrs, "enumerable", true)?;
        copy_flag(&descriptor, &attrs, "configurable", true)?;
        define(target_obj, &key, &attrs, &label)?;

        Ok(Binding {
            surface,
            owner: owner.to_string(),
            property: name.to_string(),
            kind: BindingKind::Getter,
            disguised,
        })
    }

    /// Replace constructor `name` on `holder` with a proxy that routes `new`
    /// through `construct` and plain calls through `call`. The prototype's
    /// `constructor` slot is repointed so the pair stays consistent.
    pub fn override_constructor(
        &self,
        surface: Surface,
        owner: &str,
        holder: &JsValue,
        name: &str,
        construct: ApplyTrap,
        call: ApplyTrap,
    ) -> Result<Binding, JsValue> {
        let holder_obj: &Object = holder.unchecked_ref();
        let key = JsValue::from_str(name);
        let label = format!("{}.{}", owner, name);
        let original: Function = Reflect::get(holder, &key)?
            .dyn_into()
            .map_err(|_| JsValue::from_str(&format!("{} is not a constructor", label)))?;
        let descriptor = Reflect::get_own_property_descriptor(holder_obj, &key)?;

        let handler = Object::new();
        Reflect::set(&handler, &"construct".into(), &into_function(construct))?;
        Reflect::set(&handler, &"apply".into(), &into_function(call))?;
        let proxy_ctor: Function = global("Proxy")?
            .dyn_into()
            .map_err(|_| JsValue::from_str("Proxy not found"))?;
        let proxy: Function = Reflect::construct(&proxy_ctor, &Array::of2(&original, &handler))?.unchecked_into();
        let disguised = register(&proxy, &original);
        if !disguised {
            self.degrade(surface, &format!("{}: toString mask not installed", label));
        }

        let attrs = Object::new();
        Reflect::set(&attrs, &"value".into(), &proxy)?;
        copy_flag(&descriptor, &attrs, "writable", true)?;
        copy_flag(&descriptor, &attrs, "enumerable", false)?;
        copy_flag(&descriptor, &attrs, "configurable", true)?;
        define(holder_obj, &key, &attrs, &label)?;

        let proto = Reflect::get(&original, &"prototype".into())?;
        if proto.is_object() {
            let proto_obj: &Object = proto.unchecked_ref();
            let slot = JsValue::from_str("constructor");
            let proto_descriptor = Reflect::get_own_property_descriptor(proto_obj, &slot)?;
            if !proto_descriptor.is_undefined() && Reflect::get(&proto_descriptor, &"value".into())? == *AsRef::<JsValue>::as_ref(&original) {
                let attrs = Object::new();
                Reflect::set(&attrs, &"value".into(), &proxy)?;
                copy_flag(&proto_descriptor, &attrs, "writable", true)?;
                copy_flag(&proto_descriptor, &attrs, "enumerable", false)?;
                copy_flag(&proto_descriptor, &attrs, "configurable", true)?;
                define(proto_obj, &slot, &attrs, &format!("{}.prototype.constructor", label))?;
            }
        }

        Ok(Binding {
            surface,
            owner: owner.to_string(),
            property: name.to_string(),
            kind: BindingKind::Constructor,
            disguised,
        })
    }

    /// Proxy when possible, plain forwarding function otherwise. The second
    /// value says whether the result passes introspection.
    fn disguise(
        &self,
        surface: Surface,
        label: &str,
        original: &Function,
        trap_fn: &Function,
    ) -> Result<(JsValue, bool), JsValue> {
        match make_proxy(original, trap_fn) {
            Ok(proxy) => {
                let masked = register(&proxy, original);
                if !masked {
                    self.degrade(surface, &format!("{}: toString mask not installed", label));
                }
                Ok((proxy.into(), masked))
            }
            Err(reason) => {
                self.degrade(surface, &format!("{}: {:?}", label, reason));
                Ok((forwarder(original, trap_fn)?, false))
            }
        }
    }

    /// Record that `surface` is installed without a full disguise.
    pub fn degrade(&self, surface: Surface, reason: &str) {
        log::warn!("⚠️ Stealth degraded on {}: {}", surface, reason);
        self.diagnostics.borrow_mut().push(ChameleonError::StealthDegraded {
            surface,
            reason: reason.to_string(),
        });
    }

    pub fn diagnostics(&self) -> Vec<ChameleonError> {
        self.diagnostics.borrow().clone()
    }
}

impl Default for StealthLayer {
    fn default() -> Self {
        Self::new()
    }
}

fn into_function(trap: ApplyTrap) -> Function {
    trap.into_js_value().unchecked_into()
}

fn make_proxy(original: &Function, trap_fn: &Function) -> Result<Function, JsValue> {
    let handler = Object::new();
    Reflect::set(&handler, &"apply".into(), trap_fn)?;
    let proxy_ctor: Function = global("Proxy")?
        .dyn_into()
        .map_err(|_| JsValue::from_str("Proxy not found"))?;
    Ok(Reflect::construct(&proxy_ctor, &Array::of2(original, &handler))?.unchecked_into())
}

fn register(proxy: &Function, original: &Function) -> bool {
    MASKS.with(|m| match m.borrow().as_ref() {
        Some(map) => {
            map.set(proxy, original);
            true
        }
        None => false,
    })
}

/// Plain function that routes `this` and arguments into `trap_fn`.
fn forwarder(target: &JsValue, trap_fn: &Function) -> Result<JsValue, JsValue> {
    let factory: Function = js_sys::eval(
        "(function (trap, target) { return function () { \
            return trap(target, this, Array.prototype.slice.call(arguments)); }; })",
    )?
    .dyn_into()
    .map_err(|_| JsValue::from_str("forwarder factory unavailable"))?;
    factory.call2(&JsValue::UNDEFINED, trap_fn, target)
}

/// Proxy `Function.prototype.toString` once per page.
fn ensure_to_string_mask() -> Result<(), JsValue> {
    if MASKS.with(|m| m.borrow().is_some()) {
        return Ok(());
    }
    let map = WeakMap::new();
    let function_proto = prototype("Function")?;
    let native_to_string: Function = Reflect::get(&function_proto, &"toString".into())?
        .dyn_into()
        .map_err(|_| JsValue::from_str("Function.prototype.toString missing"))?;

    let lookup = map.clone();
    let trap: ApplyTrap = Closure::wrap(Box::new(
        move |target: JsValue, this_arg: JsValue, args: JsValue| -> Result<JsValue, JsValue> {
            let masked = (this_arg.is_object() || this_arg.is_function())
                && lookup.has(this_arg.unchecked_ref());
            let receiver = if masked {
                lookup.get(this_arg.unchecked_ref())
            } else {
                this_arg
            };
            Reflect::apply::<fn() -> JsValue>(target.unchecked_ref(), &receiver, args.unchecked_ref())
        },
    )
        as Box<dyn FnMut(JsValue, JsValue, JsValue) -> Result<JsValue, JsValue>>);

    let handler = Object::new();
    Reflect::set(&handler, &"apply".into(), trap.as_ref())?;
    trap.forget();
    let proxy_ctor: Function = global("Proxy")?
        .dyn_into()
        .map_err(|_| JsValue::from_str("Proxy not found"))?;
    let proxy = Reflect::construct(&proxy_ctor, &Array::of2(&native_to_string, &handler))?;
    map.set(proxy.unchecked_ref(), &native_to_string);

    let proto_obj: &Object = function_proto.unchecked_ref();
    let descriptor = Reflect::get_own_property_descriptor(proto_obj, &"toString".into())?;
    let attrs = Object::new();
    Reflect::set(&attrs, &"value".into(), &proxy)?;
    copy_flag(&descriptor, &attrs, "writable", true)?;
    copy_flag(&descriptor, &attrs, "enumerable", false)?;
    copy_flag(&descriptor, &attrs, "configurable", true)?;
    define(proto_obj, &"toString".into(), &attrs, "Function.prototype.toString")?;

    MASKS.with(|m| *m.borrow_mut() = Some(map));
    Ok(())
}

fn copy_flag(descriptor: &JsValue, attrs: &Object, flag: &str, default: bool) -> Result<(), JsValue> {
    let key = JsValue::from_str(flag);
    let value = if descriptor.is_undefined() {
        JsValue::from_bool(default)
    } else {
        let v = Reflect::get(descriptor, &key)?;
        if v.is_undefined() {
            JsValue::from_bool(default)
        } else {
            v
        }
    };
    Reflect::set(attrs, &key, &value)?;
    Ok(())
}

fn define(target: &Object, key: &JsValue, attrs: &Object, label: &str) -> Result<(), JsValue> {
    if Reflect::define_property(target, key, attrs)? {
        Ok(())
    } else {
        Err(JsValue::from_str(&format!("{} is not configurable", label)))
    }
}

/// Introspect `candidate` against `native` with the page's own reflection
/// primitives.
pub fn verify_disguise(native: &Function, candidate: &Function) -> DisguiseCheck {
    let to_string = |f: &Function| -> Option<String> {
        let to_string: Function = Reflect::get(&prototype("Function").ok()?, &"toString".into())
            .ok()?
            .dyn_into()
            .ok()?;
        Reflect::apply(&to_string, f, &Array::new()).ok()?.as_string()
    };
    let own_keys = |f: &Function| -> Vec<String> {
        Reflect::own_keys(f)
            .map(|keys| keys.iter().filter_map(|k| k.as_string()).collect())
            .unwrap_or_default()
    };

    let source = to_string(candidate);
    DisguiseCheck {
        native_to_string: source.as_deref().map(|s| s.contains("[native code]")).unwrap_or(false)
            && source == to_string(native),
        name_matches: candidate.name() == native.name(),
        length_matches: candidate.length() == native.length(),
        own_keys_match: own_keys(candidate) == own_keys(native),
        prototype_matches: match (Reflect::get_prototype_of(candidate), Reflect::get_prototype_of(native)) {
            (Ok(a), Ok(b)) => JsValue::from(a) == JsValue::from(b),
            _ => false,
        },
    }
}

/// Getter currently installed for `owner_proto[name]`, if any.
pub fn installed_getter(proto: &JsValue, name: &str) -> Option<Function> {
    let descriptor = Reflect::get_own_property_descriptor::<JsValue>(proto.unchecked_ref(), &name.into()).ok()?;
    if descriptor.is_undefined() {
        return None;
    }
    Reflect::get(&descriptor, &"get".into()).ok()?.dyn_into().ok()
}

/// Native target behind a registered override.
pub fn native_of(candidate: &JsValue) -> Option<Function> {
    MASKS.with(|m| {
        let masks = m.borrow();
        let map = masks.as_ref()?;
        if !(candidate.is_object() || candidate.is_function()) || !map.has(candidate.unchecked_ref()) {
            return None;
        }
        map.get(candidate.unchecked_ref()).dyn_into().ok()
    })
}

/// Property of the global scope.
pub fn global(prop: &str) -> Result<JsValue, JsValue> {
    Reflect::get(&js_sys::global(), &JsValue::from_str(prop))
}

/// `prototype` of a global constructor. `undefined` constructors are errors.
pub fn prototype(constructor_name: &str) -> Result<JsValue, JsValue> {
    let ctor = global(constructor_name)?;
    if ctor.is_undefined() {
        return Err(JsValue::from_str(&format!("{} is not defined", constructor_name)));
    }
    Reflect::get(&ctor, &JsValue::from_str("prototype"))
}

/// Frozen JS array of strings.
pub fn frozen_string_array(items: &[String]) -> JsValue {
    let arr: Array = items.iter().map(|s| JsValue::from_str(s)).collect();
    Object::freeze(&arr).into()
}
