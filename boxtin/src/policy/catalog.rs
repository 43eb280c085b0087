use std::sync::Arc;

use fxhash::{FxHashMap, FxHashSet};

/// How a package is visible outside its module.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Exports {
	/// Internal to its module.
	Unexported,
	/// Exported to every reading module.
	Unqualified,
	/// Exported only to the named modules.
	Qualified(FxHashSet<Arc<str>>),
}

/// A class known to the platform's module layer: its place in the type
/// hierarchy and its declared members.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClassInfo {
	pub internal_name: Arc<str>,
	pub super_class: Option<Arc<str>>,
	pub interfaces: Vec<Arc<str>>,
	/// Method name to the set of declared descriptors.
	pub methods: FxHashMap<Arc<str>, FxHashSet<Arc<str>>>,
	/// Declared constructor descriptors.
	pub constructors: FxHashSet<Arc<str>>,
	pub public: bool,
}

impl ClassInfo {
	pub fn declares_method(&self, name: &str, descriptor: &str) -> bool {
		self.methods
			.get(name)
			.map(|descriptors| descriptors.contains(descriptor))
			.unwrap_or(false)
	}

	pub fn declares_method_named(&self, name: &str) -> bool {
		self.methods.contains_key(name)
	}

	/// Whether a fresh instance can be default-constructed, which the
	/// empty-value mapping relies on.
	pub fn default_constructible(&self) -> bool {
		self.public && self.constructors.contains("()V")
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PackageInfo {
	pub exports: Exports,
	/// Keyed by internal class name.
	pub classes: FxHashMap<Arc<str>, ClassInfo>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ModuleInfo {
	pub name: Arc<str>,
	/// Keyed by internal package name (`java/lang`).
	pub packages: FxHashMap<Arc<str>, PackageInfo>,
	/// Modules this module reads.
	pub reads: FxHashSet<Arc<str>>,
}

/// A snapshot of the platform's module layer: which modules exist, what they
/// export and read, and what classes and members they declare. Rule
/// validation and the subtype deny closure are computed against it.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ModuleCatalog {
	modules: FxHashMap<Arc<str>, ModuleInfo>,
	class_to_module: FxHashMap<Arc<str>, Arc<str>>,
}

impl ModuleCatalog {
	pub fn builder() -> CatalogBuilder {
		CatalogBuilder { catalog: ModuleCatalog::default() }
	}

	pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
		self.modules.get(name)
	}

	pub fn modules(&self) -> impl Iterator<Item = &ModuleInfo> {
		self.modules.values()
	}

	/// The module owning `internal_name`, if the class is known.
	pub fn module_of(&self, internal_name: &str) -> Option<&str> {
		self.class_to_module.get(internal_name).map(Arc::as_ref)
	}

	pub fn class(&self, internal_name: &str) -> Option<&ClassInfo> {
		let module = self.modules.get(self.class_to_module.get(internal_name)?)?;
		let package = package_of(internal_name);
		module.packages.get(package)?.classes.get(internal_name)
	}

	pub fn package(&self, module: &str, package: &str) -> Option<&PackageInfo> {
		self.modules.get(module)?.packages.get(package)
	}

	/// Whether `caller_module` can see `internal_name` through the reads and
	/// exports graph. Unknown classes are visible; the platform resolves
	/// them, not this rewriter.
	pub fn visible_to(&self, caller_module: &str, internal_name: &str) -> bool {
		let Some(owner) = self.class_to_module.get(internal_name) else {
			return true;
		};
		if owner.as_ref() == caller_module {
			return true;
		}
		let Some(module) = self.modules.get(owner) else {
			return true;
		};
		let Some(package) = module.packages.get(package_of(internal_name)) else {
			return true;
		};
		let reads = self
			.modules
			.get(caller_module)
			.map(|caller| caller.reads.contains(owner.as_ref()))
			.unwrap_or(true);
		match &package.exports {
			Exports::Unexported => false,
			Exports::Unqualified => reads,
			Exports::Qualified(to) => reads && to.contains(caller_module),
		}
	}

	/// Walks the superclass chain then declared interfaces, breadth-first,
	/// yielding every known ancestor of `internal_name` (itself excluded).
	pub fn ancestors<'l>(&'l self, internal_name: &str) -> Vec<&'l ClassInfo> {
		let mut result = vec![];
		let mut seen = FxHashSet::default();
		let mut queue: Vec<Arc<str>> = vec![];

		if let Some(class) = self.class(internal_name) {
			if let Some(super_class) = &class.super_class {
				queue.push(super_class.clone());
			}
			queue.extend(class.interfaces.iter().cloned());
		}

		while let Some(name) = queue.pop() {
			if !seen.insert(name.clone()) {
				continue;
			}
			let Some(class) = self.class(&name) else { continue };
			result.push(class);
			if let Some(super_class) = &class.super_class {
				queue.push(super_class.clone());
			}
			queue.extend(class.interfaces.iter().cloned());
		}

		result
	}

	/// Distance from `descendant` up to `ancestor`, if related.
	pub fn depth_between(&self, descendant: &str, ancestor: &str) -> Option<u32> {
		fn walk(catalog: &ModuleCatalog, from: &str, to: &str, depth: u32) -> Option<u32> {
			if from == to {
				return Some(depth);
			}
			let class = catalog.class(from)?;
			let mut best: Option<u32> = None;
			if let Some(super_class) = &class.super_class {
				best = walk(catalog, super_class, to, depth + 1);
			}
			for interface in &class.interfaces {
				let candidate = walk(catalog, interface, to, depth + 1);
				best = match (best, candidate) {
					(Some(a), Some(b)) => Some(a.min(b)),
					(a, b) => a.or(b),
				};
			}
			best
		}
		walk(self, descendant, ancestor, 0)
	}
}

/// Internal package name of a class: everything before the last `/`.
pub fn package_of(internal_name: &str) -> &str {
	match internal_name.rfind('/') {
		Some(index) => &internal_name[..index],
		None => "",
	}
}

pub struct CatalogBuilder {
	catalog: ModuleCatalog,
}

impl CatalogBuilder {
	pub fn module(mut self, name: &str, configure: impl FnOnce(&mut ModuleBuilder)) -> Self {
		let name: Arc<str> = Arc::from(name);
		let mut builder = ModuleBuilder {
			info: ModuleInfo {
				name: name.clone(),
				packages: FxHashMap::default(),
				reads: FxHashSet::default(),
			},
		};
		configure(&mut builder);

		for package in builder.info.packages.values() {
			for class_name in package.classes.keys() {
				self.catalog.class_to_module.insert(class_name.clone(), name.clone());
			}
		}
		self.catalog.modules.insert(name, builder.info);
		self
	}

	pub fn build(self) -> Arc<ModuleCatalog> {
		Arc::new(self.catalog)
	}
}

pub struct ModuleBuilder {
	info: ModuleInfo,
}

impl ModuleBuilder {
	pub fn reads(&mut self, module: &str) -> &mut Self {
		self.info.reads.insert(Arc::from(module));
		self
	}

	pub fn package(&mut self, name: &str, exports: Exports) -> &mut Self {
		self.info.packages.entry(Arc::from(name)).or_insert(PackageInfo {
			exports,
			classes: FxHashMap::default(),
		});
		self
	}

	/// Declares a class; the package record is created as unqualified-export
	/// if it has not been declared yet.
	pub fn class(&mut self, configure_name: &str, configure: impl FnOnce(&mut ClassBuilder)) -> &mut Self {
		let internal_name: Arc<str> = Arc::from(configure_name);
		let mut builder = ClassBuilder {
			info: ClassInfo {
				internal_name: internal_name.clone(),
				super_class: match configure_name == "java/lang/Object" {
					true => None,
					false => Some(Arc::from("java/lang/Object")),
				},
				interfaces: vec![],
				methods: FxHashMap::default(),
				constructors: FxHashSet::default(),
				public: true,
			},
		};
		configure(&mut builder);

		let package = Arc::from(package_of(configure_name));
		self.info
			.packages
			.entry(package)
			.or_insert(PackageInfo {
				exports: Exports::Unqualified,
				classes: FxHashMap::default(),
			})
			.classes
			.insert(internal_name, builder.info);
		self
	}
}

pub struct ClassBuilder {
	info: ClassInfo,
}

impl ClassBuilder {
	pub fn extends(&mut self, super_class: &str) -> &mut Self {
		self.info.super_class = Some(Arc::from(super_class));
		self
	}

	pub fn implements(&mut self, interface: &str) -> &mut Self {
		self.info.interfaces.push(Arc::from(interface));
		self
	}

	pub fn non_public(&mut self) -> &mut Self {
		self.info.public = false;
		self
	}

	pub fn method(&mut self, name: &str, descriptor: &str) -> &mut Self {
		self.info
			.methods
			.entry(Arc::from(name))
			.or_default()
			.insert(Arc::from(descriptor));
		self
	}

	pub fn constructor(&mut self, descriptor: &str) -> &mut Self {
		self.info.constructors.insert(Arc::from(descriptor));
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn catalog() -> Arc<ModuleCatalog> {
		ModuleCatalog::builder()
			.module("java.base", |module| {
				module
					.class("java/lang/Object", |class| {
						class.method("toString", "()Ljava/lang/String;").constructor("()V");
					})
					.class("java/lang/System", |class| {
						class.method("exit", "(I)V").method("getProperty", "(Ljava/lang/String;)Ljava/lang/String;");
					})
					.class("java/io/FileInputStream", |class| {
						class.constructor("(Ljava/lang/String;)V").constructor("(Ljava/io/File;)V");
					})
					.package("jdk/internal/misc", Exports::Unexported)
					.class("jdk/internal/misc/Unsafe", |class| {
						class.method("allocateMemory", "(J)J");
					});
			})
			.module("app", |module| {
				module.reads("java.base").class("com/example/Main", |class| {
					class.method("main", "([Ljava/lang/String;)V");
				});
			})
			.build()
	}

	#[test]
	fn resolves_classes_to_modules() {
		let catalog = catalog();
		assert_eq!(catalog.module_of("java/lang/System"), Some("java.base"));
		assert_eq!(catalog.module_of("com/example/Main"), Some("app"));
		assert_eq!(catalog.module_of("missing/Type"), None);
	}

	#[test]
	fn declared_members_are_found() {
		let catalog = catalog();
		let system = catalog.class("java/lang/System").unwrap();
		assert!(system.declares_method("exit", "(I)V"));
		assert!(!system.declares_method("exit", "()V"));
		let fis = catalog.class("java/io/FileInputStream").unwrap();
		assert!(fis.constructors.contains("(Ljava/lang/String;)V"));
	}

	#[test]
	fn unexported_packages_are_invisible() {
		let catalog = catalog();
		assert!(catalog.visible_to("app", "java/lang/System"));
		assert!(!catalog.visible_to("app", "jdk/internal/misc/Unsafe"));
		assert!(catalog.visible_to("java.base", "jdk/internal/misc/Unsafe"));
	}

	#[test]
	fn ancestors_follow_supers_and_interfaces() {
		let catalog = ModuleCatalog::builder()
			.module("m", |module| {
				module
					.class("a/Base", |class| {
						class.method("run", "()V");
					})
					.class("a/Middle", |class| {
						class.extends("a/Base").implements("a/Iface");
					})
					.class("a/Iface", |class| {
						class.method("call", "()V");
					})
					.class("a/Leaf", |class| {
						class.extends("a/Middle");
					});
			})
			.build();

		let names: Vec<&str> = catalog
			.ancestors("a/Leaf")
			.iter()
			.map(|class| class.internal_name.as_ref())
			.collect();
		assert!(names.contains(&"a/Middle"));
		assert!(names.contains(&"a/Base"));
		assert!(names.contains(&"a/Iface"));

		assert_eq!(catalog.depth_between("a/Leaf", "a/Base"), Some(2));
		assert_eq!(catalog.depth_between("a/Leaf", "a/Iface"), Some(2));
		assert_eq!(catalog.depth_between("a/Base", "a/Leaf"), None);
	}
}
