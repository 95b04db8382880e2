//! Template Renderer (§4.1): expands an object template plus an iteration
//! context into a concrete manifest. Touches neither network nor disk.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use kube_burner_core::error::TemplateError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use tera::{Context, Tera};
use uuid::Uuid;

/// Everything the renderer needs to reproduce a single instance
/// deterministically: the run UUID, job name, and the (iteration, replica)
/// coordinate scope the PRNG seed (§4.1, §9 "Templating and randomness").
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub uuid: Uuid,
    pub job_name: String,
    pub job_iteration: u64,
    pub iteration: u64,
    pub replica: u32,
    pub input_vars: serde_json::Map<String, Value>,
}

fn seed_for(ctx: &RenderContext) -> u64 {
    let mut hasher = DefaultHasher::new();
    ctx.uuid.hash(&mut hasher);
    ctx.job_name.hash(&mut hasher);
    ctx.iteration.hash(&mut hasher);
    ctx.replica.hash(&mut hasher);
    hasher.finish()
}

/// Renders one template string against one context, registering the
/// random/sequence/env helpers scoped to this single render call.
pub struct Renderer;

impl Renderer {
    pub fn render(template: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_template("object", template)
            .map_err(|source| TemplateError::Syntax {
                template: "object".to_string(),
                source,
            })?;

        let rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed_for(ctx)));
        let sequence_counter = Mutex::new(ctx.iteration.saturating_sub(1));

        tera.register_function("randInt", move |args: &std::collections::HashMap<String, Value>| {
            let min = args.get("min").and_then(Value::as_i64).unwrap_or(0);
            let max = args.get("max").and_then(Value::as_i64).unwrap_or(min + 1);
            let mut rng = rng.lock().expect("renderer rng mutex poisoned");
            let value = if max > min { rng.gen_range(min..max) } else { min };
            Ok(Value::from(value))
        });

        let rand_string_rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed_for(ctx) ^ 0x5354_5249));
        tera.register_function("randString", move |args: &std::collections::HashMap<String, Value>| {
            let length = args.get("length").and_then(Value::as_u64).unwrap_or(8) as usize;
            const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
            let mut rng = rand_string_rng.lock().expect("renderer rng mutex poisoned");
            let s: String = (0..length)
                .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
                .collect();
            Ok(Value::String(s))
        });

        tera.register_function("sequence", move |args: &std::collections::HashMap<String, Value>| {
            let start = args.get("start").and_then(Value::as_u64).unwrap_or(0);
            let mut counter = sequence_counter.lock().expect("renderer sequence mutex poisoned");
            Ok(Value::from(start + *counter))
        });

        tera.register_function("env", |args: &std::collections::HashMap<String, Value>| {
            let name = args
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| tera::Error::msg("env() requires a `name` argument"))?;
            Ok(Value::String(std::env::var(name).unwrap_or_default()))
        });

        let mut context = Context::new();
        context.insert("uuid", &ctx.uuid.to_string());
        context.insert("jobName", &ctx.job_name);
        context.insert("jobIteration", &ctx.job_iteration);
        context.insert("iteration", &ctx.iteration);
        context.insert("replica", &ctx.replica);
        for (key, value) in &ctx.input_vars {
            context.insert(key, value);
        }

        tera.render("object", &context)
            .map_err(|source| classify_render_error(source))
    }
}

fn classify_render_error(source: tera::Error) -> TemplateError {
    let message = source.to_string();
    if message.contains("Variable") && message.contains("not found") {
        TemplateError::MissingVariable(message)
    } else if message.contains("Function") && message.contains("not found") {
        TemplateError::UnknownHelper(message)
    } else {
        TemplateError::Syntax {
            template: "object".to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(iteration: u64, replica: u32) -> RenderContext {
        RenderContext {
            uuid: Uuid::nil(),
            job_name: "create-pods".to_string(),
            job_iteration: iteration,
            iteration,
            replica,
            input_vars: serde_json::Map::new(),
        }
    }

    #[test]
    fn renders_context_variables() {
        let out = Renderer::render("name: pod-{{ iteration }}-{{ replica }}", &ctx(1, 2)).unwrap();
        assert_eq!(out, "name: pod-1-2");
    }

    #[test]
    fn rendering_is_deterministic_across_calls() {
        let template = "id: {{ randInt(min=0, max=1000000) }}";
        let a = Renderer::render(template, &ctx(3, 1)).unwrap();
        let b = Renderer::render(template, &ctx(3, 1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_iterations_can_diverge() {
        let template = "id: {{ randInt(min=0, max=1000000) }}";
        let a = Renderer::render(template, &ctx(1, 1)).unwrap();
        let b = Renderer::render(template, &ctx(2, 1)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_variable_is_a_template_error() {
        let err = Renderer::render("{{ doesNotExist }}", &ctx(1, 1)).unwrap_err();
        assert!(matches!(err, TemplateError::MissingVariable(_)));
    }
}
