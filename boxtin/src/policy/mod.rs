use std::hash::{Hash, Hasher};
use std::sync::Arc;

use fxhash::FxHashMap;
use thiserror::Error;

use crate::raw::descriptor::JavaType;

pub mod builder;
pub mod catalog;
pub mod validate;

pub use builder::{RuleApplier, RulesBuilder};
pub use catalog::ModuleCatalog;

/// A constant substituted for a denied call's result.
#[derive(Debug, Clone)]
pub enum Literal {
	Boolean(bool),
	Byte(i8),
	Short(i16),
	Char(u16),
	Int(i32),
	Long(i64),
	Float(f32),
	Double(f64),
	String(Arc<str>),
}

impl Literal {
	/// The literal's own type, before any widening or boxing.
	pub fn java_type(&self) -> JavaType {
		match self {
			Literal::Boolean(_) => JavaType::Boolean,
			Literal::Byte(_) => JavaType::Byte,
			Literal::Short(_) => JavaType::Short,
			Literal::Char(_) => JavaType::Char,
			Literal::Int(_) => JavaType::Int,
			Literal::Long(_) => JavaType::Long,
			Literal::Float(_) => JavaType::Float,
			Literal::Double(_) => JavaType::Double,
			Literal::String(_) => JavaType::Object("java/lang/String".into()),
		}
	}
}

impl PartialEq for Literal {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Literal::Boolean(a), Literal::Boolean(b)) => a == b,
			(Literal::Byte(a), Literal::Byte(b)) => a == b,
			(Literal::Short(a), Literal::Short(b)) => a == b,
			(Literal::Char(a), Literal::Char(b)) => a == b,
			(Literal::Int(a), Literal::Int(b)) => a == b,
			(Literal::Long(a), Literal::Long(b)) => a == b,
			(Literal::Float(a), Literal::Float(b)) => a.to_bits() == b.to_bits(),
			(Literal::Double(a), Literal::Double(b)) => a.to_bits() == b.to_bits(),
			(Literal::String(a), Literal::String(b)) => a == b,
			_ => false,
		}
	}
}

impl Eq for Literal {}

impl Hash for Literal {
	fn hash<H: Hasher>(&self, state: &mut H) {
		std::mem::discriminant(self).hash(state);
		match self {
			Literal::Boolean(v) => v.hash(state),
			Literal::Byte(v) => v.hash(state),
			Literal::Short(v) => v.hash(state),
			Literal::Char(v) => v.hash(state),
			Literal::Int(v) => v.hash(state),
			Literal::Long(v) => v.hash(state),
			Literal::Float(v) => v.to_bits().hash(state),
			Literal::Double(v) => v.to_bits().hash(state),
			Literal::String(v) => v.hash(state),
		}
	}
}

/// A user-supplied static method: a replacement body for `Custom` actions or
/// a boolean predicate for `Checked`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CustomInfo {
	pub class_name: Arc<str>,
	pub method_name: Arc<str>,
	pub descriptor: Arc<str>,
}

impl CustomInfo {
	pub fn new(class_name: &str, method_name: &str, descriptor: &str) -> Self {
		Self {
			class_name: Arc::from(class_name),
			method_name: Arc::from(method_name),
			descriptor: Arc::from(descriptor),
		}
	}
}

/// The configured effect of reaching a denied call site.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum DenyAction {
	/// Throw the platform security exception, no message.
	Standard,
	/// Throw a named exception, constructed with `()` or `(String)`.
	Exception {
		class_name: Arc<str>,
		message: Option<Arc<str>>,
	},
	/// Return a constant.
	Value(Literal),
	/// Return the type-appropriate empty value.
	Empty,
	/// Invoke a user-supplied replacement.
	Custom(CustomInfo),
	/// Gate the original call on a boolean predicate; on `false` the inner
	/// action fires. `inner` must not itself be `Checked`.
	Checked {
		predicate: CustomInfo,
		inner: Box<DenyAction>,
	},
}

impl DenyAction {
	/// Stable discriminant used in generated stub names.
	pub fn shape(&self) -> &'static str {
		match self {
			DenyAction::Standard => "std",
			DenyAction::Exception { .. } => "exc",
			DenyAction::Value(_) => "val",
			DenyAction::Empty => "empty",
			DenyAction::Custom(_) => "custom",
			DenyAction::Checked { .. } => "checked",
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Rule {
	Allow,
	/// Enforced by rewriting call sites in caller classes.
	DenyAtCaller(DenyAction),
	/// Enforced by rewriting the target method's entry.
	DenyAtTarget(DenyAction),
}

impl Rule {
	#[inline]
	pub fn is_deny(&self) -> bool {
		!matches!(self, Rule::Allow)
	}

	pub fn action(&self) -> Option<&DenyAction> {
		match self {
			Rule::Allow => None,
			Rule::DenyAtCaller(action) | Rule::DenyAtTarget(action) => Some(action),
		}
	}
}

/// A reflective or method-handle lookup operation the planner must guard.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct GuardedLookup {
	pub class_name: Arc<str>,
	pub method_name: Arc<str>,
}

/// The built-in default set. The authoritative list comes from the policy
/// applier when one registers its own.
pub const DEFAULT_GUARDED_LOOKUPS: &[(&str, &str)] = &[
	("java/lang/Class", "getMethod"),
	("java/lang/Class", "getDeclaredMethod"),
	("java/lang/Class", "getConstructor"),
	("java/lang/Class", "getDeclaredConstructor"),
	("java/lang/invoke/MethodHandles$Lookup", "findVirtual"),
	("java/lang/invoke/MethodHandles$Lookup", "findStatic"),
	("java/lang/invoke/MethodHandles$Lookup", "findSpecial"),
	("java/lang/invoke/MethodHandles$Lookup", "findConstructor"),
];

/// `(params)` portion of a method descriptor, the key for variant overrides.
pub(crate) fn param_key(descriptor: &str) -> &str {
	match descriptor.find(')') {
		Some(index) => &descriptor[..=index],
		None => descriptor,
	}
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct MethodNode {
	pub default: Option<Rule>,
	pub variants: FxHashMap<Arc<str>, Rule>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct ConstructorNode {
	pub default: Option<Rule>,
	pub variants: FxHashMap<Arc<str>, Rule>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct ClassNode {
	pub default: Option<Rule>,
	pub methods: FxHashMap<Arc<str>, MethodNode>,
	pub constructors: ConstructorNode,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct PackageNode {
	pub default: Option<Rule>,
	pub classes: FxHashMap<Arc<str>, ClassNode>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct ModuleNode {
	pub default: Option<Rule>,
	pub packages: FxHashMap<Arc<str>, PackageNode>,
}

/// A deny inherited from a subclass, applicable to calls expressed against
/// an ancestor type. Deepest subclass wins.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct InheritedDeny {
	pub depth: u32,
	pub from_class: Arc<str>,
	pub rule: Rule,
}

/// An immutable, structurally comparable policy snapshot. Shared read-only
/// across concurrent transforms once built.
#[derive(Debug, Clone)]
pub struct Rules {
	pub(crate) default: Rule,
	pub(crate) modules: FxHashMap<Arc<str>, ModuleNode>,
	/// `(ancestor, name, param key)` to the deepest subclass deny.
	pub(crate) inherited: FxHashMap<(Arc<str>, Arc<str>, Arc<str>), InheritedDeny>,
	pub(crate) guarded_lookups: Vec<GuardedLookup>,
	pub(crate) catalog: Arc<ModuleCatalog>,
	pub(crate) has_caller_denies: bool,
}

impl PartialEq for Rules {
	fn eq(&self, other: &Self) -> bool {
		self.default == other.default
			&& self.modules == other.modules
			&& self.inherited == other.inherited
			&& self.guarded_lookups == other.guarded_lookups
			&& (Arc::ptr_eq(&self.catalog, &other.catalog) || self.catalog == other.catalog)
	}
}

impl Eq for Rules {}

fn hash_sorted<'l, K, V, H>(map: &'l FxHashMap<K, V>, state: &mut H, hash_value: impl Fn(&'l V, &mut H))
where
	K: Ord + Hash + Eq,
	H: Hasher,
{
	let mut keys: Vec<&K> = map.keys().collect();
	keys.sort();
	keys.len().hash(state);
	for key in keys {
		key.hash(state);
		hash_value(&map[key], state);
	}
}

impl Hash for Rules {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.default.hash(state);
		hash_sorted(&self.modules, state, |module, state| {
			module.default.hash(state);
			hash_sorted(&module.packages, state, |package, state| {
				package.default.hash(state);
				hash_sorted(&package.classes, state, |class, state| {
					class.default.hash(state);
					class.constructors.default.hash(state);
					hash_sorted(&class.constructors.variants, state, Rule::hash);
					hash_sorted(&class.methods, state, |method, state| {
						method.default.hash(state);
						hash_sorted(&method.variants, state, Rule::hash);
					});
				});
			});
		});
		self.guarded_lookups.hash(state);
	}
}

impl Rules {
	/// An all-allow policy against an empty catalog.
	pub fn allow_all() -> Arc<Rules> {
		Arc::new(Rules {
			default: Rule::Allow,
			modules: FxHashMap::default(),
			inherited: FxHashMap::default(),
			guarded_lookups: vec![],
			catalog: Arc::new(ModuleCatalog::default()),
			has_caller_denies: false,
		})
	}

	/// Whether any rule in the tree denies at the caller; gates the
	/// reflective-lookup redirection.
	pub fn has_caller_denies(&self) -> bool {
		self.has_caller_denies
	}

	pub fn catalog(&self) -> &Arc<ModuleCatalog> {
		&self.catalog
	}

	pub fn guarded_lookups(&self) -> &[GuardedLookup] {
		&self.guarded_lookups
	}

	/// Per-class lookup view for `target_class` as seen from
	/// `caller_module`. Class-level allows do not apply when the target is
	/// not visible to the caller through the reads/exports graph; the owning
	/// module's default governs instead.
	pub fn for_class<'l>(&'l self, caller_module: &str, target_class: &str) -> ForClass<'l> {
		let package_name = catalog::package_of(target_class);
		let module = self
			.catalog
			.module_of(target_class)
			.and_then(|module| self.modules.get(module));
		let package = module.and_then(|module| module.packages.get(package_name));
		let class = package.and_then(|package| package.classes.get(target_class));

		ForClass {
			root_default: &self.default,
			module_default: module.and_then(|m| m.default.as_ref()),
			package_default: package.and_then(|p| p.default.as_ref()),
			class,
			visible: self.catalog.visible_to(caller_module, target_class),
		}
	}

	/// The deepest subclass deny reaching `target_class` for the given
	/// member, if any. Used to enforce denials through upcast references.
	pub fn subtype_deny(&self, target_class: &str, name: &str, descriptor: &str) -> Option<&Rule> {
		let key = (
			Arc::from(target_class),
			Arc::from(name),
			Arc::from(param_key(descriptor)),
		);
		self.inherited.get(&key).map(|deny| &deny.rule)
	}
}

/// Resolved per-class view; `rule_for_*` apply most-specific-wins with
/// fall-through to the containing scope's default.
pub struct ForClass<'l> {
	root_default: &'l Rule,
	module_default: Option<&'l Rule>,
	package_default: Option<&'l Rule>,
	class: Option<&'l ClassNode>,
	visible: bool,
}

impl ForClass<'_> {
	fn scope_default(&self) -> &Rule {
		self.package_default
			.or(self.module_default)
			.unwrap_or(self.root_default)
	}

	fn narrow(&self, rule: Option<&Rule>, fallback: &Rule) -> Rule {
		let resolved = rule.unwrap_or(fallback);
		if !self.visible && matches!(resolved, Rule::Allow) {
			return self.module_default.unwrap_or(self.root_default).clone();
		}
		resolved.clone()
	}

	pub fn rule_for_method(&self, name: &str, descriptor: &str) -> Rule {
		let scope = self.scope_default();
		let Some(class) = self.class else {
			return self.narrow(None, scope);
		};
		let class_default = class.default.as_ref().unwrap_or(scope);
		let Some(method) = class.methods.get(name) else {
			return self.narrow(None, class_default);
		};
		let method_default = method.default.as_ref().unwrap_or(class_default);
		self.narrow(method.variants.get(param_key(descriptor)), method_default)
	}

	pub fn rule_for_constructor(&self, descriptor: &str) -> Rule {
		let scope = self.scope_default();
		let Some(class) = self.class else {
			return self.narrow(None, scope);
		};
		let class_default = class.default.as_ref().unwrap_or(scope);
		let constructors = &class.constructors;
		let constructor_default = constructors.default.as_ref().unwrap_or(class_default);
		self.narrow(constructors.variants.get(param_key(descriptor)), constructor_default)
	}
}

/// Configuration-time failures. Raised by [`RulesBuilder::build`] and
/// validation, never during a transform.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum PolicyError {
	#[error("Unknown module `{0}`")]
	UnknownModule(Arc<str>),
	#[error("Unknown package `{package}` in module `{module}`")]
	UnknownPackage { module: Arc<str>, package: Arc<str> },
	#[error("Unknown class `{0}`")]
	UnknownClass(Arc<str>),
	#[error("Class `{class}` has no method `{name}`")]
	UnknownMethod { class: Arc<str>, name: Arc<str> },
	#[error("Class `{class}` has no variant `{name}{params}`")]
	UnknownVariant {
		class: Arc<str>,
		name: Arc<str>,
		params: Arc<str>,
	},
	#[error("Class `{class}` has no constructor `{params}`")]
	UnknownConstructor { class: Arc<str>, params: Arc<str> },
	#[error("Exception class `{class}` lacks the required `{constructor}` constructor")]
	MissingExceptionConstructor { class: Arc<str>, constructor: Arc<str> },
	#[error("Value `{literal:?}` is not assignable to the return type of `{class}.{name}{descriptor}`")]
	UnassignableValue {
		class: Arc<str>,
		name: Arc<str>,
		descriptor: Arc<str>,
		literal: Literal,
	},
	#[error("Custom action `{custom}` does not fit `{class}.{name}{descriptor}`: {reason}")]
	CustomMismatch {
		class: Arc<str>,
		name: Arc<str>,
		descriptor: Arc<str>,
		custom: Arc<str>,
		reason: Arc<str>,
	},
	#[error("Empty action has no defined value for `{class}.{name}{descriptor}`")]
	EmptyNotApplicable {
		class: Arc<str>,
		name: Arc<str>,
		descriptor: Arc<str>,
	},
	#[error("Checked action may not nest another checked action")]
	NestedChecked,
	#[error("Target-side constructor denial on `{class}` must throw")]
	NonThrowingConstructorDenial { class: Arc<str> },
	#[error("Malformed descriptor `{0}`")]
	MalformedDescriptor(Arc<str>),
}
