use std::sync::Arc;

use fxhash::FxHashMap;

use crate::policy::catalog::ModuleCatalog;
use crate::policy::{
	param_key, validate, ClassNode, CustomInfo, DenyAction, GuardedLookup, InheritedDeny,
	ModuleNode, PackageNode, PolicyError, Rule, Rules, DEFAULT_GUARDED_LOOKUPS,
};

/// A bundled rule set that can be merged into a builder, and optionally the
/// authoritative list of reflective lookup operations to guard.
pub trait RuleApplier {
	fn apply(&self, builder: &mut RulesBuilder);

	fn guarded_lookups(&self) -> Option<Vec<GuardedLookup>> {
		None
	}
}

/// Builds a [`Rules`] tree by narrowing scope module by module. All
/// validation happens at [`build`](RulesBuilder::build); the scope methods
/// only record intent.
pub struct RulesBuilder {
	catalog: Arc<ModuleCatalog>,
	default: Rule,
	modules: FxHashMap<Arc<str>, ModuleNode>,
	guarded_lookups: Option<Vec<GuardedLookup>>,
}

impl RulesBuilder {
	pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
		Self {
			catalog,
			default: Rule::Allow,
			modules: FxHashMap::default(),
			guarded_lookups: None,
		}
	}

	pub fn allow_all(&mut self) -> &mut Self {
		self.default = Rule::Allow;
		self
	}

	pub fn deny_all(&mut self, action: DenyAction) -> &mut Self {
		self.default = Rule::DenyAtCaller(action);
		self
	}

	pub fn for_module(&mut self, name: &str) -> ModuleScope<'_> {
		let node = self.modules.entry(Arc::from(name)).or_default();
		ModuleScope { node }
	}

	/// Merges a bundled rule set. An applier carrying its own guarded-lookup
	/// list overrides the built-in default.
	pub fn apply_rules(&mut self, applier: &dyn RuleApplier) -> &mut Self {
		applier.apply(self);
		if let Some(lookups) = applier.guarded_lookups() {
			self.guarded_lookups = Some(lookups);
		}
		self
	}

	/// Reports every configuration failure through `sink`, then returns the
	/// first one. Without a sink, stops at the first failure.
	pub fn validate(&self, sink: Option<&mut dyn FnMut(&PolicyError)>) -> Result<(), PolicyError> {
		validate::run(&self.catalog, &self.default, &self.modules, sink)
	}

	/// Validates, precomputes the subtype deny closure, and freezes the
	/// tree.
	pub fn build(self) -> Result<Arc<Rules>, PolicyError> {
		self.validate(None)?;

		let has_caller_denies = matches!(self.default, Rule::DenyAtCaller(_))
			|| self.modules.values().any(module_has_caller_denies);

		let mut rules = Rules {
			default: self.default,
			modules: self.modules,
			inherited: FxHashMap::default(),
			guarded_lookups: self.guarded_lookups.unwrap_or_else(|| {
				DEFAULT_GUARDED_LOOKUPS
					.iter()
					.map(|(class_name, method_name)| GuardedLookup {
						class_name: Arc::from(*class_name),
						method_name: Arc::from(*method_name),
					})
					.collect()
			}),
			catalog: self.catalog,
			has_caller_denies,
		};
		rules.inherited = compute_inherited(&rules);
		Ok(Arc::new(rules))
	}
}

fn module_has_caller_denies(module: &ModuleNode) -> bool {
	let is_caller_deny = |rule: &Option<Rule>| matches!(rule, Some(Rule::DenyAtCaller(_)));
	is_caller_deny(&module.default)
		|| module.packages.values().any(|package| {
			is_caller_deny(&package.default)
				|| package.classes.values().any(|class| {
					is_caller_deny(&class.default)
						|| is_caller_deny(&class.constructors.default)
						|| class.constructors.variants.values().any(|r| matches!(r, Rule::DenyAtCaller(_)))
						|| class.methods.values().any(|method| {
							is_caller_deny(&method.default)
								|| method.variants.values().any(|r| matches!(r, Rule::DenyAtCaller(_)))
						})
				})
		})
}

/// Denies declared on a class reach calls expressed against any ancestor
/// declaring the same member. Computed once at build so transforms only do
/// flat lookups.
fn compute_inherited(rules: &Rules) -> FxHashMap<(Arc<str>, Arc<str>, Arc<str>), InheritedDeny> {
	let catalog = &rules.catalog;
	let mut inherited: FxHashMap<(Arc<str>, Arc<str>, Arc<str>), InheritedDeny> = FxHashMap::default();

	for module in catalog.modules() {
		for package in module.packages.values() {
			for class in package.classes.values() {
				let view = rules.for_class(&module.name, &class.internal_name);
				for (name, descriptors) in &class.methods {
					for descriptor in descriptors {
						let rule = view.rule_for_method(name, descriptor);
						if !rule.is_deny() {
							continue;
						}
						for ancestor in catalog.ancestors(&class.internal_name) {
							if !ancestor.declares_method(name, descriptor) {
								continue;
							}
							let ancestor_module = catalog.module_of(&ancestor.internal_name).unwrap_or("");
							let ancestor_rule = rules
								.for_class(ancestor_module, &ancestor.internal_name)
								.rule_for_method(name, descriptor);
							if ancestor_rule.is_deny() {
								continue;
							}

							let depth = catalog
								.depth_between(&class.internal_name, &ancestor.internal_name)
								.unwrap_or(0);
							let key = (
								ancestor.internal_name.clone(),
								name.clone(),
								Arc::from(param_key(descriptor)),
							);
							let candidate = InheritedDeny {
								depth,
								from_class: class.internal_name.clone(),
								rule: rule.clone(),
							};
							match inherited.get(&key) {
								Some(existing) if existing.depth >= depth => {},
								_ => {
									inherited.insert(key, candidate);
								},
							}
						}
					}
				}
			}
		}
	}

	inherited
}

pub struct ModuleScope<'l> {
	node: &'l mut ModuleNode,
}

impl<'l> ModuleScope<'l> {
	pub fn allow_all(&mut self) -> &mut Self {
		self.node.default = Some(Rule::Allow);
		self
	}

	pub fn deny_all(&mut self, action: DenyAction) -> &mut Self {
		self.node.default = Some(Rule::DenyAtCaller(action));
		self
	}

	/// Narrows into a package; the module scope is consumed so the package
	/// scope can outlive intermediate temporaries.
	pub fn for_package(self, name: &str) -> PackageScope<'l> {
		let node = self.node.packages.entry(Arc::from(name)).or_default();
		PackageScope { node }
	}
}

pub struct PackageScope<'l> {
	node: &'l mut PackageNode,
}

impl<'l> PackageScope<'l> {
	pub fn allow_all(&mut self) -> &mut Self {
		self.node.default = Some(Rule::Allow);
		self
	}

	pub fn deny_all(&mut self, action: DenyAction) -> &mut Self {
		self.node.default = Some(Rule::DenyAtCaller(action));
		self
	}

	pub fn for_class(self, internal_name: &str) -> ClassScope<'l> {
		let node = self.node.classes.entry(Arc::from(internal_name)).or_default();
		ClassScope { node }
	}
}

pub struct ClassScope<'l> {
	node: &'l mut ClassNode,
}

impl ClassScope<'_> {
	pub fn allow_all(&mut self) -> &mut Self {
		self.node.default = Some(Rule::Allow);
		self
	}

	pub fn deny_all(&mut self, action: DenyAction) -> &mut Self {
		self.node.default = Some(Rule::DenyAtCaller(action));
		self
	}

	/// Gates every member of the class on a caller-side predicate.
	pub fn caller_check(&mut self, predicate: CustomInfo, inner: DenyAction) -> &mut Self {
		self.node.default = Some(Rule::DenyAtCaller(DenyAction::Checked {
			predicate,
			inner: Box::new(inner),
		}));
		self
	}

	/// Gates every member of the class on a target-side predicate.
	pub fn target_check(&mut self, predicate: CustomInfo, inner: DenyAction) -> &mut Self {
		self.node.default = Some(Rule::DenyAtTarget(DenyAction::Checked {
			predicate,
			inner: Box::new(inner),
		}));
		self
	}

	pub fn allow_method(&mut self, name: &str) -> &mut Self {
		self.method_node(name).default = Some(Rule::Allow);
		self
	}

	pub fn deny_method(&mut self, action: DenyAction, name: &str) -> &mut Self {
		self.method_node(name).default = Some(Rule::DenyAtCaller(action));
		self
	}

	pub fn deny_method_at_target(&mut self, action: DenyAction, name: &str) -> &mut Self {
		self.method_node(name).default = Some(Rule::DenyAtTarget(action));
		self
	}

	pub fn allow_variant(&mut self, name: &str, params: &str) -> &mut Self {
		self.variant(name, params, Rule::Allow)
	}

	pub fn deny_variant(&mut self, action: DenyAction, name: &str, params: &str) -> &mut Self {
		self.variant(name, params, Rule::DenyAtCaller(action))
	}

	pub fn deny_variant_at_target(&mut self, action: DenyAction, name: &str, params: &str) -> &mut Self {
		self.variant(name, params, Rule::DenyAtTarget(action))
	}

	pub fn allow_all_constructors(&mut self) -> &mut Self {
		self.node.constructors.default = Some(Rule::Allow);
		self
	}

	pub fn deny_all_constructors(&mut self, action: DenyAction) -> &mut Self {
		self.node.constructors.default = Some(Rule::DenyAtCaller(action));
		self
	}

	pub fn allow_constructor(&mut self, params: &str) -> &mut Self {
		self.constructor_variant(params, Rule::Allow)
	}

	pub fn deny_constructor(&mut self, action: DenyAction, params: &str) -> &mut Self {
		self.constructor_variant(params, Rule::DenyAtCaller(action))
	}

	pub fn deny_constructor_at_target(&mut self, action: DenyAction, params: &str) -> &mut Self {
		self.constructor_variant(params, Rule::DenyAtTarget(action))
	}

	fn method_node(&mut self, name: &str) -> &mut crate::policy::MethodNode {
		self.node.methods.entry(Arc::from(name)).or_default()
	}

	fn variant(&mut self, name: &str, params: &str, rule: Rule) -> &mut Self {
		self.method_node(name)
			.variants
			.insert(Arc::from(param_key(params)), rule);
		self
	}

	fn constructor_variant(&mut self, params: &str, rule: Rule) -> &mut Self {
		self.node
			.constructors
			.variants
			.insert(Arc::from(param_key(params)), rule);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::catalog::Exports;

	fn catalog() -> Arc<ModuleCatalog> {
		ModuleCatalog::builder()
			.module("java.base", |module| {
				module
					.class("java/lang/Object", |class| {
						class.method("toString", "()Ljava/lang/String;").constructor("()V");
					})
					.class("java/lang/System", |class| {
						class
							.method("exit", "(I)V")
							.method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;")
							.method("getProperty", "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;");
					})
					.class("java/io/FileInputStream", |class| {
						class.constructor("(Ljava/lang/String;)V");
					})
					.package("java/util", Exports::Unqualified)
					.class("java/util/Map", |class| {
						class.method("put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;");
					});
			})
			.module("app", |module| {
				module
					.reads("java.base")
					.class("com/example/Provider", |class| {
						class
							.implements("java/util/Map")
							.method("put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")
							.constructor("()V");
					});
			})
			.build()
	}

	#[test]
	fn most_specific_rule_wins() {
		let mut builder = RulesBuilder::new(catalog());
		builder.allow_all();
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/System")
			.deny_method(DenyAction::Standard, "exit")
			.allow_variant("exit", "()");
		let rules = builder.build().unwrap();

		let class = rules.for_class("app", "java/lang/System");
		assert!(class.rule_for_method("exit", "(I)V").is_deny());
		assert_eq!(class.rule_for_method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;"), Rule::Allow);
	}

	#[test]
	fn class_deny_overrides_module_allow() {
		let mut builder = RulesBuilder::new(catalog());
		builder.allow_all();
		{
			let mut module = builder.for_module("java.base");
			module.allow_all();
			module
				.for_package("java/io")
				.for_class("java/io/FileInputStream")
				.deny_all_constructors(DenyAction::Standard);
		}
		let rules = builder.build().unwrap();

		let class = rules.for_class("app", "java/io/FileInputStream");
		assert!(class.rule_for_constructor("(Ljava/lang/String;)V").is_deny());
		let system = rules.for_class("app", "java/lang/System");
		assert_eq!(system.rule_for_method("exit", "(I)V"), Rule::Allow);
	}

	#[test]
	fn equal_builders_produce_equal_rules() {
		let build = || {
			let mut builder = RulesBuilder::new(catalog());
			builder
				.for_module("java.base")
				.for_package("java/lang")
				.for_class("java/lang/System")
				.deny_method(DenyAction::Empty, "exit");
			builder.build().unwrap()
		};
		let a = build();
		let b = build();
		assert_eq!(a, b);

		use std::hash::{Hash, Hasher};
		let hash = |rules: &Rules| {
			let mut hasher = fxhash::FxHasher::default();
			rules.hash(&mut hasher);
			hasher.finish()
		};
		assert_eq!(hash(&a), hash(&b));
	}

	#[test]
	fn subclass_deny_reaches_interface_calls() {
		let mut builder = RulesBuilder::new(catalog());
		builder
			.for_module("app")
			.for_package("com/example")
			.for_class("com/example/Provider")
			.deny_all(DenyAction::Standard);
		let rules = builder.build().unwrap();

		let deny = rules.subtype_deny(
			"java/util/Map",
			"put",
			"(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
		);
		assert!(deny.is_some_and(Rule::is_deny));
	}

	#[test]
	fn variant_override_beats_method_rule() {
		let mut builder = RulesBuilder::new(catalog());
		builder
			.for_module("java.base")
			.for_package("java/lang")
			.for_class("java/lang/System")
			.deny_method(DenyAction::Standard, "getProperty")
			.allow_variant("getProperty", "(Ljava/lang/String;Ljava/lang/String;)");
		let rules = builder.build().unwrap();

		let class = rules.for_class("app", "java/lang/System");
		assert!(class.rule_for_method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;").is_deny());
		assert_eq!(
			class.rule_for_method("getProperty", "(Ljava/lang/String;Ljava/lang/String;)Ljava/lang/String;"),
			Rule::Allow,
		);
	}
}
