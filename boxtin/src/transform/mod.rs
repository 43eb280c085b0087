use fxhash::FxHashMap;

use crate::policy::Rules;
use crate::raw::class_file::ClassFile;
use crate::raw::ClassFormatError;

pub mod actions;
pub mod planner;
pub mod rewriter;
pub mod shim;

pub use actions::{ActionWriter, HelperClass, HELPER_SUFFIX};
pub use shim::{LookupDecision, ReflectionShim};

/// The product of one transform call: the rewritten class plus any helper
/// classes the host must define next to it (through its hidden-class
/// facility or an isolated loader chained to the caller's).
#[derive(Debug, Clone)]
pub struct TransformOutput {
	pub class_bytes: Vec<u8>,
	pub helpers: Vec<HelperClass>,
}

/// Parses, plans, and rewrites one class. `Ok(None)` means the policy left
/// nothing to change and the class should load untouched. Errors follow the
/// class-format taxonomy; the caller decides between leaving the class
/// alone and substituting the empty-class form.
#[tracing::instrument(skip(bytes, caller_rules, target_rules))]
pub fn transform_class(
	caller_module: &str,
	internal_name: &str,
	bytes: &[u8],
	caller_rules: &Rules,
	target_rules: &Rules,
) -> Result<Option<TransformOutput>, ClassFormatError> {
	let mut class = ClassFile::parse(bytes)?;

	let plan = planner::plan_class(&class, caller_module, caller_rules, target_rules)?;
	if plan.is_empty() {
		return Ok(None);
	}

	let catalog = caller_rules.catalog().as_ref();
	let mut actions = actions::ActionWriter::new(catalog, internal_name, class.major_version);
	let bootstrap_original = class.bootstrap_methods().cloned();

	let mut replacements: FxHashMap<usize, Vec<u8>> = FxHashMap::default();
	{
		let ClassFile { pool, methods, .. } = &mut class;
		for method_plan in &plan.methods {
			let method = &methods[method_plan.method_index];
			let replacement = rewriter::rewrite_method(
				pool,
				catalog,
				internal_name,
				method,
				method_plan,
				&mut actions,
			)?;
			replacements.insert(method_plan.method_index, replacement);
		}
	}

	let bootstrap = match (&bootstrap_original, plan.bootstrap.is_empty()) {
		(Some(original), false) => Some(rewriter::rewrite_bootstrap(
			&mut class.pool,
			original,
			&plan.bootstrap,
			&mut actions,
		)?),
		_ => None,
	};

	let class_bytes = class.emit(&replacements, bootstrap.as_ref());
	let helpers = actions.finish().into_iter().collect();

	Ok(Some(TransformOutput { class_bytes, helpers }))
}
