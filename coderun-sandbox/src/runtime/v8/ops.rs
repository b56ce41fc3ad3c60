//! Host ops and the prelude that turns a fresh isolate into the restricted
//! snippet namespace.

use crate::context::{ExecutionContext, OutputSink, PrintOptions};
use crate::error::{Result, SandboxError};
use deno_core::{op2, Extension, OpState};

/// Print operation - appends formatted values to the execution's sink
#[op2]
fn op_sandbox_print(
    state: &mut OpState,
    #[serde] values: Vec<String>,
    #[serde] options: PrintOptions,
) {
    if let Some(sink) = state.try_borrow::<OutputSink>() {
        sink.print(&values, &options);
    }
}

/// Create the sandbox extension carrying the output op
pub fn sandbox_extension() -> Extension {
    let ops = vec![op_sandbox_print()];

    Extension {
        name: "coderun_sandbox",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

/// Called with (builtins, argv, env). Captures everything it needs before
/// stripping the global object, so later tampering by the snippet cannot
/// reach the host op.
const PRELUDE_JS: &str = r#"
(function (builtins, argv, env) {
    "use strict";

    const printOp = Deno.core.ops.op_sandbox_print;
    const queueTimer = Deno.core.queueUserTimer;
    const cancelTimer = Deno.core.cancelTimer;
    const timerDepth = Deno.core.getTimerDepth;
    const apply = Reflect.apply;
    const toNumber = Number;
    const stringify = JSON.stringify;
    const toText = String;
    const objectKeys = Object.keys;
    const getPrototypeOf = Object.getPrototypeOf;
    const defineProperty = Object.defineProperty;
    const hasOwn = Object.prototype.hasOwnProperty;
    const objectPrototype = Object.prototype;
    const freeze = Object.freeze;
    const ownKeys = Reflect.ownKeys;
    const call = Function.prototype.call.bind(Function.prototype.call);

    const format = (value) => {
        if (typeof value === "string") {
            return value;
        }
        if (value !== null && typeof value === "object") {
            try {
                const json = stringify(value);
                if (json !== undefined) {
                    return json;
                }
            } catch (_) {
                // cyclic or hostile toJSON, fall through
            }
        }
        return toText(value);
    };

    const isKeywords = (value) => {
        if (value === null || typeof value !== "object") {
            return false;
        }
        if (getPrototypeOf(value) !== objectPrototype) {
            return false;
        }
        const keys = objectKeys(value);
        if (keys.length === 0) {
            return false;
        }
        for (let i = 0; i < keys.length; i++) {
            if (keys[i] !== "sep" && keys[i] !== "end" && keys[i] !== "file") {
                return false;
            }
        }
        return true;
    };

    const optionalText = (value) =>
        value === undefined || value === null ? null : toText(value);

    const emit = (values, keywords) => {
        const parts = [];
        for (let i = 0; i < values.length; i++) {
            parts[i] = format(values[i]);
        }
        printOp(parts, {
            sep: optionalText(keywords.sep),
            end: optionalText(keywords.end),
            file: optionalText(keywords.file),
        });
    };

    function print(...values) {
        let keywords = {};
        if (values.length > 0 && isKeywords(values[values.length - 1])) {
            keywords = values[values.length - 1];
            values.length -= 1;
        }
        emit(values, keywords);
    }

    const consoleMethod = (file) => (...values) => emit(values, { file });
    const sandboxConsole = freeze({
        log: consoleMethod("stdout"),
        info: consoleMethod("stdout"),
        debug: consoleMethod("stdout"),
        error: consoleMethod("stderr"),
        warn: consoleMethod("stderr"),
    });

    const sandboxProcess = { argv, env };

    // Only ids handed out here may be cancelled, never internal timers
    const liveTimers = new Set();
    const schedule = (repeat) => (callback, delay = 0, ...args) => {
        if (typeof callback !== "function") {
            throw new TypeError("timer callback must be a function");
        }
        let timeout = toNumber(delay);
        if (!(timeout >= 0)) {
            timeout = 0;
        }
        let id;
        id = queueTimer(timerDepth() + 1, repeat, timeout, () => {
            if (!repeat) {
                liveTimers.delete(id);
            }
            apply(callback, undefined, args);
        });
        liveTimers.add(id);
        return id;
    };
    const unschedule = (id) => {
        if (liveTimers.delete(id)) {
            cancelTimer(id);
        }
    };
    const setTimeout = schedule(false);
    const setInterval = schedule(true);

    const allowed = new Set(builtins);
    const names = ownKeys(globalThis);
    for (let i = 0; i < names.length; i++) {
        const name = names[i];
        if (typeof name === "string" && allowed.has(name)) {
            continue;
        }
        try {
            delete globalThis[name];
        } catch (_) {
            // non-configurable, shadowed below
        }
        if (call(hasOwn, globalThis, name)) {
            try {
                defineProperty(globalThis, name, { value: undefined });
            } catch (_) {
                // frozen engine slot, nothing left to do
            }
        }
    }

    const bind = (name, value) =>
        defineProperty(globalThis, name, {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        });
    bind("print", print);
    bind("console", sandboxConsole);
    bind("process", sandboxProcess);
    bind("setTimeout", setTimeout);
    bind("setInterval", setInterval);
    bind("clearTimeout", unschedule);
    bind("clearInterval", unschedule);
})
"#;

/// Source of the prelude invocation for `context`.
pub fn prelude_script(context: &ExecutionContext) -> Result<String> {
    let encode = |value: serde_json::Result<String>| {
        value.map_err(|err| SandboxError::internal(format!("failed to encode prelude: {}", err)))
    };
    let builtins = encode(serde_json::to_string(&context.builtin_names()))?;
    let argv = encode(serde_json::to_string(&context.ambient().argv))?;
    let env = encode(serde_json::to_string(&context.ambient().env))?;

    Ok(format!("{}({}, {}, {});", PRELUDE_JS, builtins, argv, env))
}
