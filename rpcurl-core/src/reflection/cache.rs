//! # Descriptor Cache
//!
//! Everything a resolver has learned from the server, as a fully linked
//! [`DescriptorPool`] plus an index of extensions by `(extendee, number)`.
//!
//! Files only enter the cache in complete batches: every import of every file must be
//! either cached already or part of the same batch. A batch is linked into a copy of the
//! current pool and the copy replaces the original in a single assignment, so a failed
//! insert leaves the cache exactly as it was.
use super::descriptor::Descriptor;
use prost_reflect::{DescriptorError, DescriptorPool, ExtensionDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum CacheInsertError {
    #[error("file '{file}' imports '{dependency}', which is neither cached nor part of the same batch")]
    MissingDependency { file: String, dependency: String },

    #[error("import cycle detected through file '{0}'")]
    ImportCycle(String),

    #[error("received a file descriptor without a name")]
    UnnamedFile,

    #[error("failed to link file descriptors: {0}")]
    Link(#[from] DescriptorError),
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorCache {
    pool: DescriptorPool,
    extensions: HashMap<(String, u32), ExtensionDescriptor>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.pool.get_file_by_name(name).is_some()
    }

    pub fn file_count(&self) -> usize {
        self.pool.files().len()
    }

    /// Looks up any named schema element: message, enum, service or extension.
    pub fn find_descriptor(&self, full_name: &str) -> Option<Descriptor> {
        let pool = &self.pool;

        pool.get_message_by_name(full_name)
            .map(Descriptor::MessageDescriptor)
            .or_else(|| pool.get_service_by_name(full_name).map(Descriptor::ServiceDescriptor))
            .or_else(|| pool.get_enum_by_name(full_name).map(Descriptor::EnumDescriptor))
            .or_else(|| {
                pool.get_extension_by_name(full_name)
                    .map(Descriptor::ExtensionDescriptor)
            })
    }

    pub fn find_extension(&self, message: &str, number: u32) -> Option<ExtensionDescriptor> {
        self.extensions
            .get(&(message.to_string(), number))
            .cloned()
    }

    /// Imports of `batch` that are neither cached nor provided by the batch itself,
    /// as `(importing file, missing import)` pairs.
    pub fn missing_dependencies(&self, batch: &[FileDescriptorProto]) -> Vec<(String, String)> {
        let provided: HashSet<&str> = batch.iter().map(|f| f.name()).collect();

        batch
            .iter()
            .filter(|fd| !self.contains_file(fd.name()))
            .flat_map(|fd| {
                fd.dependency
                    .iter()
                    .filter(|dep| !provided.contains(dep.as_str()) && !self.contains_file(dep))
                    .map(|dep| (fd.name().to_string(), dep.clone()))
            })
            .collect()
    }

    /// Links `batch` into the cache and returns how many files were new.
    ///
    /// Files that are already cached are skipped.
    pub fn insert_batch(
        &mut self,
        batch: Vec<FileDescriptorProto>,
    ) -> Result<usize, CacheInsertError> {
        if batch.iter().any(|fd| fd.name.is_none()) {
            return Err(CacheInsertError::UnnamedFile);
        }

        let mut fresh: HashMap<String, FileDescriptorProto> = HashMap::new();
        for fd in batch {
            if !self.contains_file(fd.name()) {
                fresh.entry(fd.name().to_string()).or_insert(fd);
            }
        }

        if fresh.is_empty() {
            return Ok(0);
        }

        let fresh: Vec<_> = fresh.into_values().collect();

        if let Some((file, dependency)) = self.missing_dependencies(&fresh).into_iter().next() {
            return Err(CacheInsertError::MissingDependency { file, dependency });
        }

        check_acyclic(&fresh)?;

        let added = fresh.len();
        let mut pool = self.pool.clone();
        pool.add_file_descriptor_protos(fresh)?;

        self.extensions = index_extensions(&pool);
        self.pool = pool;

        Ok(added)
    }

    /// A snapshot of every cached file.
    pub fn file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.pool.file_descriptor_protos().cloned().collect(),
        }
    }
}

fn index_extensions(pool: &DescriptorPool) -> HashMap<(String, u32), ExtensionDescriptor> {
    pool.all_extensions()
        .map(|ext| {
            let key = (ext.containing_message().full_name().to_string(), ext.number());
            (key, ext)
        })
        .collect()
}

// Kahn's algorithm over the imports that stay inside the batch.
fn check_acyclic(batch: &[FileDescriptorProto]) -> Result<(), CacheInsertError> {
    let names: HashSet<&str> = batch.iter().map(|f| f.name()).collect();
    let mut pending: HashMap<&str, usize> = batch
        .iter()
        .map(|fd| {
            let local = fd
                .dependency
                .iter()
                .filter(|dep| names.contains(dep.as_str()))
                .count();
            (fd.name(), local)
        })
        .collect();

    let mut ready: Vec<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();

    while let Some(done) = ready.pop() {
        pending.remove(done);
        for fd in batch {
            if fd.dependency.iter().any(|dep| dep == done)
                && let Some(count) = pending.get_mut(fd.name())
            {
                *count -= 1;
                if *count == 0 {
                    ready.push(fd.name());
                }
            }
        }
    }

    match pending.keys().min() {
        Some(file) => Err(CacheInsertError::ImportCycle(file.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{DescriptorProto, FieldDescriptorProto, field_descriptor_proto};

    fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
        DescriptorProto {
            name: Some(name.to_string()),
            field: fields,
            ..Default::default()
        }
    }

    fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(field_descriptor_proto::Label::Optional as i32),
            r#type: Some(field_descriptor_proto::Type::Message as i32),
            type_name: Some(type_name.to_string()),
            ..Default::default()
        }
    }

    fn file(name: &str, deps: &[&str], messages: Vec<DescriptorProto>) -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some(name.to_string()),
            package: Some("cache.test".to_string()),
            dependency: deps.iter().map(|d| d.to_string()).collect(),
            message_type: messages,
            syntax: Some("proto3".to_string()),
            ..Default::default()
        }
    }

    fn base() -> FileDescriptorProto {
        file("base.proto", &[], vec![message("Base", vec![])])
    }

    fn user() -> FileDescriptorProto {
        file(
            "user.proto",
            &["base.proto"],
            vec![message("User", vec![message_field("base", 1, ".cache.test.Base")])],
        )
    }

    #[test]
    fn batches_may_carry_their_own_imports_in_any_order() {
        let mut cache = DescriptorCache::new();

        let added = cache.insert_batch(vec![user(), base()]).unwrap();

        assert_eq!(added, 2);
        assert!(cache.find_descriptor("cache.test.User").is_some());
        assert!(cache.find_descriptor("cache.test.Base").is_some());
    }

    #[test]
    fn reinserting_cached_files_is_a_no_op() {
        let mut cache = DescriptorCache::new();
        cache.insert_batch(vec![base()]).unwrap();

        assert_eq!(cache.insert_batch(vec![base()]).unwrap(), 0);
        assert_eq!(cache.file_count(), 1);
    }

    #[test]
    fn missing_import_fails_and_leaves_the_cache_untouched() {
        let mut cache = DescriptorCache::new();
        let other = file("other.proto", &[], vec![message("Other", vec![])]);
        cache.insert_batch(vec![other]).unwrap();
        let before = cache.file_descriptor_set();

        let err = cache.insert_batch(vec![user()]).unwrap_err();

        assert!(matches!(
            err,
            CacheInsertError::MissingDependency { ref file, ref dependency }
                if file == "user.proto" && dependency == "base.proto"
        ));
        assert_eq!(cache.file_descriptor_set(), before);
        assert!(cache.find_descriptor("cache.test.User").is_none());
        assert!(cache.find_descriptor("cache.test.Other").is_some());
    }

    #[test]
    fn import_cycles_are_rejected() {
        let mut cache = DescriptorCache::new();
        let a = file("a.proto", &["b.proto"], vec![]);
        let b = file("b.proto", &["a.proto"], vec![]);

        let err = cache.insert_batch(vec![a, b]).unwrap_err();

        assert!(matches!(err, CacheInsertError::ImportCycle(ref f) if f == "a.proto"));
        assert_eq!(cache.file_count(), 0);
    }

    #[test]
    fn link_errors_leave_the_cache_untouched() {
        let mut cache = DescriptorCache::new();
        cache.insert_batch(vec![base()]).unwrap();

        // Imports resolve, but the referenced type does not exist.
        let broken = file(
            "broken.proto",
            &["base.proto"],
            vec![message("Broken", vec![message_field("x", 1, ".cache.test.Nope")])],
        );

        assert!(matches!(
            cache.insert_batch(vec![broken]),
            Err(CacheInsertError::Link(_))
        ));
        assert_eq!(cache.file_count(), 1);
        assert!(cache.find_descriptor("cache.test.Broken").is_none());
    }
}
