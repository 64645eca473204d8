//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use snapcache::application::data_source::DataSource;
use snapcache::application::kits::KitBuilder;
use snapcache::application::repos::{ContentEntity, NodeRecord, VersionRecord};
use snapcache::application::snapshot_service::PublishedSnapshotService;
use snapcache::cache::{CacheConfig, ContentStore};
use snapcache::domain::{
    ContentData, ContentKind, ContentNode, ContentNodeKit, PropertyData, PropertyValue,
    PublishedState, ROOT_ID,
};
use snapcache::infra::memory::InMemoryContentRepository;
use snapcache::serialization::{
    ContentCacheDataModel, DecompressionMode, PropertyCacheCompression, SerializerKind,
    create_serializer,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub const CONTENT_TYPE: i32 = 7;

pub fn store() -> Arc<ContentStore> {
    Arc::new(ContentStore::new(
        ContentKind::Content,
        CacheConfig {
            auto_collect: false,
            ..Default::default()
        },
    ))
}

pub fn data(name: &str) -> ContentData {
    ContentData {
        name: name.to_string(),
        url_segment: None,
        version_id: 1,
        version_date: OffsetDateTime::UNIX_EPOCH,
        writer_id: 0,
        template_id: None,
        published: true,
        properties: BTreeMap::new(),
        culture_infos: None,
    }
}

/// A published-only kit for a node under `parent_id`.
pub fn kit(id: i32, parent_id: i32, sort_order: i32, name: &str) -> ContentNodeKit {
    ContentNodeKit {
        node: ContentNode::new(
            id,
            Uuid::from_u128(id as u128),
            CONTENT_TYPE,
            1,
            format!("-1,{id}"),
            sort_order,
            parent_id,
            OffsetDateTime::UNIX_EPOCH,
            0,
        ),
        content_type_id: CONTENT_TYPE,
        draft_data: None,
        published_data: Some(data(name)),
    }
}

pub fn child_ids(children: &[Arc<ContentNode>]) -> Vec<i32> {
    children.iter().map(|node| node.id).collect()
}

pub fn version(name: &str) -> VersionRecord {
    VersionRecord {
        version_id: 1,
        version_date: OffsetDateTime::UNIX_EPOCH,
        writer_id: 4,
        template_id: None,
        name: name.to_string(),
    }
}

/// Node metadata for a published content node; `path` lists ancestors from the root.
pub fn node_record(id: i32, parent_id: i32, path: &str, sort_order: i32, name: &str) -> NodeRecord {
    NodeRecord {
        id,
        uid: Uuid::from_u128(id as u128),
        kind: ContentKind::Content,
        content_type_id: CONTENT_TYPE,
        level: path.split(',').count() as i32 - 1,
        path: path.to_string(),
        sort_order,
        parent_id,
        trashed: false,
        create_date: OffsetDateTime::UNIX_EPOCH,
        creator_id: 4,
        edited: false,
        published: true,
        edit: version(name),
        publish: Some(version(name)),
    }
}

pub fn model(title: &str) -> ContentCacheDataModel {
    let mut model = ContentCacheDataModel::default();
    model.property_data.insert(
        "title".into(),
        vec![PropertyData::invariant(PropertyValue::String(title.into()))],
    );
    model
}

pub fn entity(node: NodeRecord, state: PublishedState, title: &str) -> ContentEntity {
    ContentEntity {
        node,
        state,
        edited: model(title),
        published: None,
    }
}

pub fn root_entity(id: i32, sort_order: i32, name: &str) -> ContentEntity {
    entity(
        node_record(id, ROOT_ID, &format!("-1,{id}"), sort_order, name),
        PublishedState::Publishing,
        name,
    )
}

pub fn data_source(repo: Arc<InMemoryContentRepository>, kind: SerializerKind) -> Arc<DataSource> {
    let serializer = create_serializer(
        kind,
        Arc::new(PropertyCacheCompression::disabled()),
        DecompressionMode::Lazy,
    );
    Arc::new(DataSource::new(
        repo.clone(),
        repo,
        KitBuilder::new(serializer, false),
        100,
    ))
}

pub fn service(repo: Arc<InMemoryContentRepository>) -> Arc<PublishedSnapshotService> {
    Arc::new(PublishedSnapshotService::new(
        CacheConfig {
            auto_collect: false,
            ..Default::default()
        },
        data_source(repo, SerializerKind::MsgPack),
    ))
}
