// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build-time rendering of templated assets.
//!
//! Templates are Handlebars with HTML escaping disabled, rendered against the
//! bundle's connection list. Besides the built-in helpers, `delimitedEach`
//! iterates an array like `each` but writes a delimiter (`,` unless the
//! `delimiter` hash parameter says otherwise) between items, which keeps
//! generated JSON and Rego lists free of trailing separators.
//!
//! Asset templates refer to the current context as a bare `.` (for example
//! `{{#delimitedEach .}}`), which the Handlebars grammar only accepts as
//! `this`. Bare dots inside mustaches are rewritten before parsing.

use std::borrow::Cow;

use handlebars::{
	no_escape, BlockContext, Context, Handlebars, Helper, HelperResult, Output, RenderContext,
	RenderErrorReason, Renderable,
};
use serde_json::Value;

use crate::error::{BundlerError, Result};

const DEFAULT_DELIMITER: &str = ",";

pub struct TemplateRenderer {
	registry: Handlebars<'static>,
}

impl TemplateRenderer {
	pub fn new() -> Self {
		let mut registry = Handlebars::new();
		registry.register_escape_fn(no_escape);
		registry.register_helper("delimitedEach", Box::new(delimited_each));
		Self { registry }
	}

	/// Render `source` against `context`. `name` is only used in errors.
	pub fn render(&self, name: &str, source: &str, context: &Value) -> Result<String> {
		self.registry
			.render_template(&rewrite_bare_dots(source), context)
			.map_err(|e| BundlerError::Template {
				name: name.to_string(),
				message: e.to_string(),
			})
	}
}

impl Default for TemplateRenderer {
	fn default() -> Self {
		Self::new()
	}
}

/// Replace each `.` that stands alone as a path expression inside `{{ }}`
/// with `this`. Text outside mustaches and quoted literals are left alone.
fn rewrite_bare_dots(source: &str) -> Cow<'_, str> {
	if !source.contains("{{") {
		return Cow::Borrowed(source);
	}

	let mut out = String::with_capacity(source.len() + 8);
	let mut rest = source;
	while let Some(open) = rest.find("{{") {
		out.push_str(&rest[..open]);
		let tail = &rest[open..];
		let Some(close) = tail.find("}}") else {
			out.push_str(tail);
			return Cow::Owned(out);
		};
		rewrite_tag(&tail[..close], &mut out);
		out.push_str("}}");
		rest = &tail[close + 2..];
	}
	out.push_str(rest);
	Cow::Owned(out)
}

fn rewrite_tag(tag: &str, out: &mut String) {
	let bytes = tag.as_bytes();
	let mut quote: Option<u8> = None;
	let mut copied = 0;
	for (i, &b) in bytes.iter().enumerate() {
		match quote {
			Some(q) if b == q => quote = None,
			Some(_) => {}
			None if b == b'"' || b == b'\'' => quote = Some(b),
			None if b == b'.' && is_bare_dot(bytes, i) => {
				out.push_str(&tag[copied..i]);
				out.push_str("this");
				copied = i + 1;
			}
			None => {}
		}
	}
	out.push_str(&tag[copied..]);
}

fn is_bare_dot(bytes: &[u8], i: usize) -> bool {
	let before = i.checked_sub(1).map(|j| bytes[j]);
	let after = bytes.get(i + 1).copied();
	let opens = matches!(
		before,
		Some(b'{' | b'#' | b'^' | b'~' | b'(' | b'=' | b'&' | b' ' | b'\t' | b'\n' | b'\r')
	);
	let closes = matches!(after, None | Some(b'}' | b')' | b'~' | b' ' | b'\t' | b'\n' | b'\r'));
	opens && closes
}

fn delimited_each<'reg, 'rc>(
	h: &Helper<'rc>,
	r: &'reg Handlebars<'reg>,
	ctx: &'rc Context,
	rc: &mut RenderContext<'reg, 'rc>,
	out: &mut dyn Output,
) -> HelperResult {
	let param = h
		.param(0)
		.ok_or(RenderErrorReason::ParamNotFoundForIndex("delimitedEach", 0))?;
	let items = param
		.value()
		.as_array()
		.ok_or(RenderErrorReason::InvalidParamType("array"))?;
	let delimiter = h
		.hash_get("delimiter")
		.and_then(|d| d.value().as_str())
		.unwrap_or(DEFAULT_DELIMITER);

	if items.is_empty() {
		if let Some(inverse) = h.inverse() {
			inverse.render(r, ctx, rc, out)?;
		}
		return Ok(());
	}

	let Some(template) = h.template() else {
		return Ok(());
	};

	let last = items.len() - 1;
	for (index, item) in items.iter().enumerate() {
		if index > 0 {
			out.write(delimiter)?;
		}

		let mut block = BlockContext::new();
		block.set_base_value(item.clone());
		block.set_local_var("index", Value::from(index));
		block.set_local_var("first", Value::Bool(index == 0));
		block.set_local_var("last", Value::Bool(index == last));
		rc.push_block(block);
		let rendered = template.render(r, ctx, rc, out);
		rc.pop_block();
		rendered?;
	}

	Ok(())
}
