//! Resource-level metadata documents
//!
//! Every resource carries two generated documents next to its content:
//! `<rid>/data/resourcemetadata.xml` and `<rid>/data/resourcemap.xml`. They
//! are rewritten whenever `metadata_dirty` says they are stale.

use crate::Result;
use crate::storage::{ObjectStore, basename};
use crate::types::Resource;
use async_trait::async_trait;
use std::sync::Arc;

/// File name of the resource metadata document
pub const RESOURCE_METADATA_FILE: &str = "resourcemetadata.xml";

/// File name of the resource map document
pub const RESOURCE_MAP_FILE: &str = "resourcemap.xml";

/// Whether `path` is one of `resource_id`'s generated resource-level documents
///
/// Only the two exact locations qualify; a content file that merely shares
/// the name does not.
pub fn is_resource_metadata_path(resource_id: &str, path: &str) -> bool {
    path == metadata_path(resource_id) || path == map_path(resource_id)
}

/// Logical path of the metadata document for `resource_id`
pub fn metadata_path(resource_id: &str) -> String {
    format!("{}/data/{}", resource_id, RESOURCE_METADATA_FILE)
}

/// Logical path of the resource map for `resource_id`
pub fn map_path(resource_id: &str) -> String {
    format!("{}/data/{}", resource_id, RESOURCE_MAP_FILE)
}

/// Regenerates a resource's metadata documents
///
/// Implementations only write the documents. Flag bookkeeping is done by the
/// caller once the write has succeeded.
#[async_trait]
pub trait MetadataWriter: Send + Sync {
    /// Write fresh metadata documents for `resource`
    async fn write_metadata(&self, resource: &Resource) -> Result<()>;
}

/// Writes minimal Dublin Core / ORE documents into the object store
pub struct XmlMetadataWriter {
    store: Arc<dyn ObjectStore>,
}

impl XmlMetadataWriter {
    /// Writer publishing into `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MetadataWriter for XmlMetadataWriter {
    async fn write_metadata(&self, resource: &Resource) -> Result<()> {
        let files = self.store.list_files(&resource.file_path()).await?;
        let generated = chrono::Utc::now().to_rfc3339();

        let metadata = render_metadata(resource, &generated);
        let map = render_resource_map(resource, &files);

        self.store
            .put_bytes(&metadata_path(&resource.id), metadata.into_bytes())
            .await?;
        self.store
            .put_bytes(&map_path(&resource.id), map.into_bytes())
            .await?;

        tracing::debug!(
            resource_id = %resource.id,
            files = files.len(),
            "regenerated metadata documents"
        );
        Ok(())
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_metadata(resource: &Resource, generated: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/">
  <rdf:Description rdf:about="{id}">
    <dc:identifier>{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:type>{kind}</dc:type>
    <dcterms:modified>{generated}</dcterms:modified>
  </rdf:Description>
</rdf:RDF>
"#,
        id = escape_xml(&resource.id),
        title = escape_xml(&resource.title),
        kind = resource.kind.as_str(),
        generated = generated,
    )
}

fn render_resource_map(resource: &Resource, files: &[String]) -> String {
    let mut aggregates = String::new();
    for file in files {
        aggregates.push_str(&format!(
            "    <ore:aggregates rdf:resource=\"{}\" dc:title=\"{}\"/>\n",
            escape_xml(file),
            escape_xml(basename(file))
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:ore="http://www.openarchives.org/ore/terms/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <rdf:Description rdf:about="{id}/data/{map}">
    <ore:describes rdf:resource="{id}"/>
  </rdf:Description>
  <rdf:Description rdf:about="{id}">
{aggregates}  </rdf:Description>
</rdf:RDF>
"#,
        id = escape_xml(&resource.id),
        map = RESOURCE_MAP_FILE,
        aggregates = aggregates,
    )
}
