//! Tag query and suggestion engine.
//!
//! Stateless between calls: every operation reads through the injected tag
//! and entity repositories, so one engine can serve concurrent requests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use stratum_core::defaults::{
    ENTITY_PAGE_LIMIT, FUZZY_MIN_QUERY_LENGTH, INTERNAL_FETCH_LIMIT, PAGE_LIMIT_AUTOCOMPLETE,
    PAGE_LIMIT_MAX, TAG_PAGE_LIMIT,
};
use stratum_core::{
    group_tags_by_type, Result, Tag, TagFilterSpec, TagLookup, TagRef, TagRepository,
    TaggedEntity, TaggedEntityRepository,
};

use crate::combine::{combine_groups, GroupMatch};
use crate::fuzzy;

/// An entity returned from a tag query, with its tags resolved for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedEntityView {
    #[serde(flatten)]
    pub entity: TaggedEntity,
    /// Tags in the entity's own order.
    pub tags: Vec<TagRef>,
}

impl TaggedEntityView {
    /// Tags grouped by type, each group in first-seen order.
    pub fn tags_by_type(&self) -> BTreeMap<String, Vec<TagRef>> {
        group_tags_by_type(&self.tags)
    }
}

/// Autocomplete request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestTagsRequest {
    pub query: String,
    /// Restrict candidates to one tag type.
    pub tag_type: Option<String>,
    /// Restrict candidates to tags co-occurring on an entity with all of these.
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl SuggestTagsRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_tag_type(mut self, tag_type: impl Into<String>) -> Self {
        self.tag_type = Some(tag_type.into());
        self
    }

    pub fn with_tag_ids(mut self, tag_ids: Vec<Uuid>) -> Self {
        self.tag_ids = tag_ids;
        self
    }

    pub fn with_page(mut self, offset: i64, limit: i64) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }
}

/// One autocomplete result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSuggestion {
    #[serde(flatten)]
    pub tag: TagRef,
    /// Similarity score for fuzzy matches; `None` for substring matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

fn page_bounds(offset: Option<i64>, limit: Option<i64>, default_limit: i64) -> (i64, i64) {
    (
        offset.unwrap_or(0).max(0),
        limit.unwrap_or(default_limit).clamp(1, PAGE_LIMIT_MAX),
    )
}

/// Tag query engine over one tagged entity kind.
pub struct TagQueryEngine<T, E> {
    tags: T,
    entities: E,
    fetch_page_size: i64,
}

impl<T, E> TagQueryEngine<T, E>
where
    T: TagRepository,
    E: TaggedEntityRepository,
{
    pub fn new(tags: T, entities: E) -> Self {
        Self {
            tags,
            entities,
            fetch_page_size: INTERNAL_FETCH_LIMIT,
        }
    }

    /// Page size used when reading every tag matching a lookup.
    pub fn with_fetch_page_size(mut self, size: i64) -> Self {
        self.fetch_page_size = size.max(1);
        self
    }

    pub fn tags(&self) -> &T {
        &self.tags
    }

    pub fn entities(&self) -> &E {
        &self.entities
    }

    /// Every tag matching `lookup`, read page by page until a short page.
    async fn find_all_tags(&self, tenant_id: Uuid, lookup: &TagLookup) -> Result<Vec<Tag>> {
        let mut all = Vec::new();
        loop {
            let page = self
                .tags
                .find_many(tenant_id, lookup, all.len() as i64, self.fetch_page_size)
                .await?;
            let short = (page.len() as i64) < self.fetch_page_size;
            all.extend(page);
            if short {
                return Ok(all);
            }
        }
    }

    /// Entities matching a multi-group tag filter, newest first.
    ///
    /// Each id, type and (type, name) pair is evaluated as its own group and
    /// the groups are combined per the filter's mode. An empty filter matches
    /// nothing.
    pub async fn resolve_entities_by_tags(
        &self,
        tenant_id: Uuid,
        filter: &TagFilterSpec,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<TaggedEntityView>> {
        let start = Instant::now();
        let (offset, limit) = page_bounds(offset, limit, ENTITY_PAGE_LIMIT);

        let groups = filter.groups();
        let mut matches = Vec::with_capacity(groups.len());
        for group in &groups {
            let tags = self.find_all_tags(tenant_id, &group.lookup()).await?;
            if tags.is_empty() {
                debug!(tenant_id = %tenant_id, group = ?group, "Tag group resolved to no tags");
                matches.push(GroupMatch::Unresolved);
                continue;
            }
            let tag_ids: Vec<Uuid> = tags.iter().map(|t| t.id).collect();
            let ids = self.entities.ids_with_any_tag(tenant_id, &tag_ids).await?;
            matches.push(GroupMatch::Entities(ids));
        }

        let combined = combine_groups(&matches, filter.mode);
        let views = if combined.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<Uuid> = combined.into_iter().collect();
            let page = self
                .entities
                .fetch_page(tenant_id, &ids, offset, limit)
                .await?;
            self.attach_tags(tenant_id, page).await?
        };

        info!(
            subsystem = "search",
            component = "tag_engine",
            op = "resolve_entities_by_tags",
            tenant_id = %tenant_id,
            entity_kind = %self.entities.kind(),
            mode = ?filter.mode,
            group_count = groups.len(),
            result_count = views.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tag query complete"
        );
        Ok(views)
    }

    async fn attach_tags(
        &self,
        tenant_id: Uuid,
        entities: Vec<TaggedEntity>,
    ) -> Result<Vec<TaggedEntityView>> {
        let mut seen = HashSet::new();
        let wanted: Vec<Uuid> = entities
            .iter()
            .flat_map(|e| e.tag_ids.iter().copied())
            .filter(|id| seen.insert(*id))
            .collect();

        let by_id: HashMap<Uuid, TagRef> = if wanted.is_empty() {
            HashMap::new()
        } else {
            let limit = wanted.len() as i64;
            self.tags
                .find_many(tenant_id, &TagLookup::by_ids(wanted), 0, limit)
                .await?
                .into_iter()
                .map(|t| (t.id, t.to_ref()))
                .collect()
        };

        Ok(entities
            .into_iter()
            .map(|entity| {
                // Ids whose tag has since been deleted are dropped.
                let tags = entity
                    .tag_ids
                    .iter()
                    .filter_map(|id| by_id.get(id).cloned())
                    .collect();
                TaggedEntityView { entity, tags }
            })
            .collect())
    }

    /// Autocomplete tag names.
    ///
    /// Short queries use a case-insensitive substring match in insertion
    /// order. Longer queries are fuzzy-scored, filtered by the score cutoff
    /// and ranked best first.
    pub async fn suggest_tags(
        &self,
        tenant_id: Uuid,
        req: &SuggestTagsRequest,
    ) -> Result<Vec<TagSuggestion>> {
        let start = Instant::now();
        let (offset, limit) = page_bounds(req.offset, req.limit, PAGE_LIMIT_AUTOCOMPLETE);
        let query = req.query.as_str();

        let mut lookup = TagLookup {
            tag_type: req.tag_type.clone(),
            ..Default::default()
        };
        if !req.tag_ids.is_empty() {
            let allowed = self
                .entities
                .tag_ids_cooccurring_with_all(tenant_id, &req.tag_ids)
                .await?;
            if allowed.is_empty() {
                debug!(
                    tenant_id = %tenant_id,
                    required = req.tag_ids.len(),
                    "No entity carries every required tag"
                );
                return Ok(Vec::new());
            }
            lookup.ids = allowed.into_iter().collect();
        }

        let fuzzy_match = query.chars().count() >= FUZZY_MIN_QUERY_LENGTH;
        let suggestions: Vec<TagSuggestion> = if fuzzy_match {
            let candidates = self.find_all_tags(tenant_id, &lookup).await?;
            let candidate_count = candidates.len();
            let ranked = fuzzy::rank(query, candidates, |t: &Tag| t.name.as_str());
            debug!(
                candidate_count,
                matched = ranked.len(),
                "Fuzzy tag candidates scored"
            );
            ranked
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .map(|(tag, score)| TagSuggestion {
                    tag: tag.to_ref(),
                    score: Some(score),
                })
                .collect()
        } else {
            lookup.name_contains = Some(query.to_string());
            self.tags
                .find_many(tenant_id, &lookup, offset, limit)
                .await?
                .into_iter()
                .map(|tag| TagSuggestion {
                    tag: tag.to_ref(),
                    score: None,
                })
                .collect()
        };

        info!(
            subsystem = "search",
            component = "tag_engine",
            op = "suggest_tags",
            tenant_id = %tenant_id,
            query = %query,
            fuzzy = fuzzy_match,
            result_count = suggestions.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Tag suggestions computed"
        );
        Ok(suggestions)
    }

    /// Tags of one type in insertion order.
    pub async fn list_tags_by_type(
        &self,
        tenant_id: Uuid,
        tag_type: &str,
        offset: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<TagRef>> {
        let (offset, limit) = page_bounds(offset, limit, TAG_PAGE_LIMIT);
        let tags = self
            .tags
            .find_many(tenant_id, &TagLookup::by_type(tag_type), offset, limit)
            .await?;
        Ok(tags.iter().map(Tag::to_ref).collect())
    }

    /// Replace an entity's tags from a `type -> names` map.
    ///
    /// Missing tags are created. Returns the entity's new tag list.
    pub async fn tag_entity(
        &self,
        tenant_id: Uuid,
        entity_id: Uuid,
        tags: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<TagRef>> {
        let mut refs: Vec<TagRef> = Vec::new();
        for (tag_type, names) in tags {
            for name in names {
                let tag = self.tags.get_or_create(tenant_id, tag_type, name).await?;
                if !refs.iter().any(|r| r.id == tag.id) {
                    refs.push(tag.to_ref());
                }
            }
        }

        let ids: Vec<Uuid> = refs.iter().map(|r| r.id).collect();
        self.entities.set_tags(tenant_id, entity_id, &ids).await?;

        info!(
            subsystem = "search",
            component = "tag_engine",
            op = "tag_entity",
            tenant_id = %tenant_id,
            entity_id = %entity_id,
            entity_kind = %self.entities.kind(),
            result_count = refs.len(),
            "Entity tags replaced"
        );
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::{CreateEventRequest, CreateFileRequest, TagMatchMode};
    use stratum_db::{MemoryEntityStore, MemoryStore};

    type Engine = TagQueryEngine<MemoryStore, MemoryEntityStore>;

    fn engine(store: &MemoryStore) -> Engine {
        TagQueryEngine::new(store.clone(), store.files())
    }

    async fn file(store: &MemoryStore, tenant: Uuid, name: &str) -> Uuid {
        store
            .create_file(
                tenant,
                CreateFileRequest {
                    file_name: name.to_string(),
                    object_key: format!("uploads/{}", name),
                    thumbnail_key: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    fn labels(views: &[TaggedEntityView]) -> HashSet<String> {
        views.iter().map(|v| v.entity.label.clone()).collect()
    }

    fn names(suggestions: &[TagSuggestion]) -> Vec<&str> {
        suggestions.iter().map(|s| s.tag.name.as_str()).collect()
    }

    fn tag_map(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(t, ns)| (t.to_string(), ns.iter().map(|n| n.to_string()).collect()))
            .collect()
    }

    /// Files 1-3 tagged color:red, files 2-4 tagged size:big.
    async fn seeded() -> (MemoryStore, Engine, Uuid) {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let tenant = Uuid::new_v4();
        for i in 1..=4 {
            let id = file(&store, tenant, &format!("f{}", i)).await;
            let mut pairs: Vec<(&str, &[&str])> = Vec::new();
            if i <= 3 {
                pairs.push(("color", &["red"]));
            }
            if i >= 2 {
                pairs.push(("size", &["big"]));
            }
            engine.tag_entity(tenant, id, &tag_map(&pairs)).await.unwrap();
        }
        (store, engine, tenant)
    }

    #[tokio::test]
    async fn test_all_mode_intersects_type_name_groups() {
        let (_store, engine, tenant) = seeded().await;
        let filter = TagFilterSpec::new(TagMatchMode::All)
            .with_type_name("color", "red")
            .with_type_name("size", "big");

        let views = engine
            .resolve_entities_by_tags(tenant, &filter, None, None)
            .await
            .unwrap();
        let expected: HashSet<String> = ["f2", "f3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(labels(&views), expected);
    }

    #[tokio::test]
    async fn test_any_mode_unions_type_name_groups() {
        let (_store, engine, tenant) = seeded().await;
        let filter = TagFilterSpec::new(TagMatchMode::Any)
            .with_type_name("color", "red")
            .with_type_name("size", "big");

        let views = engine
            .resolve_entities_by_tags(tenant, &filter, None, None)
            .await
            .unwrap();
        let expected: HashSet<String> =
            ["f1", "f2", "f3", "f4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(labels(&views), expected);
    }

    #[tokio::test]
    async fn test_results_carry_resolved_tags() {
        let (_store, engine, tenant) = seeded().await;
        let filter = TagFilterSpec::new(TagMatchMode::All)
            .with_tag_type("color")
            .with_tag_type("size");

        let views = engine
            .resolve_entities_by_tags(tenant, &filter, None, None)
            .await
            .unwrap();
        assert_eq!(views.len(), 2);
        for view in &views {
            let grouped = view.tags_by_type();
            assert_eq!(grouped["color"][0].name, "red");
            assert_eq!(grouped["size"][0].name, "big");
        }
    }

    #[tokio::test]
    async fn test_unknown_criterion_is_not_an_error() {
        let (_store, engine, tenant) = seeded().await;

        let only_unknown = TagFilterSpec::new(TagMatchMode::All).with_type_name("color", "teal");
        assert!(engine
            .resolve_entities_by_tags(tenant, &only_unknown, None, None)
            .await
            .unwrap()
            .is_empty());

        let with_known = TagFilterSpec::new(TagMatchMode::All)
            .with_type_name("color", "teal")
            .with_tag_id(Uuid::new_v4())
            .with_type_name("size", "big");
        let views = engine
            .resolve_entities_by_tags(tenant, &with_known, None, None)
            .await
            .unwrap();
        assert_eq!(views.len(), 3);

        assert!(engine
            .resolve_entities_by_tags(tenant, &TagFilterSpec::default(), None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_query_is_tenant_scoped_and_paginated() {
        let (_store, engine, tenant) = seeded().await;
        let filter = TagFilterSpec::new(TagMatchMode::Any).with_tag_type("size");

        let other = engine
            .resolve_entities_by_tags(Uuid::new_v4(), &filter, None, None)
            .await
            .unwrap();
        assert!(other.is_empty());

        let first = engine
            .resolve_entities_by_tags(tenant, &filter, Some(0), Some(2))
            .await
            .unwrap();
        let rest = engine
            .resolve_entities_by_tags(tenant, &filter, Some(2), Some(2))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(rest.len(), 1);
        assert!(labels(&first).is_disjoint(&labels(&rest)));
    }

    #[tokio::test]
    async fn test_fuzzy_suggestions_rank_and_cut_off() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let tenant = Uuid::new_v4();
        for name in ["category", "cats", "dog"] {
            store.get_or_create(tenant, "animal", name).await.unwrap();
        }

        let suggestions = engine
            .suggest_tags(tenant, &SuggestTagsRequest::new("cat"))
            .await
            .unwrap();
        assert_eq!(names(&suggestions), vec!["category", "cats"]);
        assert!(suggestions.iter().all(|s| s.score.is_some()));

        let second = engine
            .suggest_tags(tenant, &SuggestTagsRequest::new("cat").with_page(1, 1))
            .await
            .unwrap();
        assert_eq!(names(&second), vec!["cats"]);
    }

    #[tokio::test]
    async fn test_short_queries_use_substring_match() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let tenant = Uuid::new_v4();
        for name in ["Cats", "dog", "scat"] {
            store.get_or_create(tenant, "animal", name).await.unwrap();
        }
        store.get_or_create(tenant, "misc", "cap").await.unwrap();

        let suggestions = engine
            .suggest_tags(tenant, &SuggestTagsRequest::new("ca"))
            .await
            .unwrap();
        assert_eq!(names(&suggestions), vec!["Cats", "scat", "cap"]);
        assert!(suggestions.iter().all(|s| s.score.is_none()));

        let typed = engine
            .suggest_tags(tenant, &SuggestTagsRequest::new("ca").with_tag_type("misc"))
            .await
            .unwrap();
        assert_eq!(names(&typed), vec!["cap"]);
    }

    #[tokio::test]
    async fn test_query_length_counts_surrounding_whitespace() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let tenant = Uuid::new_v4();
        for name in ["cab", "car"] {
            store.get_or_create(tenant, "vehicle", name).await.unwrap();
        }

        // Three characters, so fuzzy scoring applies even though one is a space.
        let suggestions = engine
            .suggest_tags(tenant, &SuggestTagsRequest::new("ca "))
            .await
            .unwrap();
        assert_eq!(names(&suggestions), vec!["cab", "car"]);
        assert!(suggestions.iter().all(|s| s.score.is_some()));
    }

    #[tokio::test]
    async fn test_every_tag_is_read_past_the_fetch_page() {
        let store = MemoryStore::new();
        let engine = engine(&store).with_fetch_page_size(2);
        let tenant = Uuid::new_v4();
        for i in 0..5 {
            store
                .get_or_create(tenant, "color", &format!("zzzq{}", i))
                .await
                .unwrap();
        }
        let last = store.get_or_create(tenant, "color", "category").await.unwrap();

        let suggestions = engine
            .suggest_tags(tenant, &SuggestTagsRequest::new("category"))
            .await
            .unwrap();
        assert_eq!(names(&suggestions)[0], "category");
        assert_eq!(suggestions[0].score, Some(100.0));

        let id = file(&store, tenant, "swatch.png").await;
        store.files().add_tag(tenant, id, last.id).await.unwrap();
        let found = engine
            .resolve_entities_by_tags(
                tenant,
                &TagFilterSpec::new(TagMatchMode::All).with_tag_type("color"),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(labels(&found), HashSet::from(["swatch.png".to_string()]));
    }

    #[tokio::test]
    async fn test_suggestions_restricted_to_cooccurring_tags() {
        let store = MemoryStore::new();
        let engine = engine(&store);
        let tenant = Uuid::new_v4();

        let a = file(&store, tenant, "a.png").await;
        let b = file(&store, tenant, "b.png").await;
        let tags_a = engine
            .tag_entity(tenant, a, &tag_map(&[("project", &["apollo", "apricot"])]))
            .await
            .unwrap();
        engine
            .tag_entity(tenant, b, &tag_map(&[("project", &["april"])]))
            .await
            .unwrap();

        let apollo = tags_a[0].id;
        let suggestions = engine
            .suggest_tags(
                tenant,
                &SuggestTagsRequest::new("ap").with_tag_ids(vec![apollo]),
            )
            .await
            .unwrap();
        assert_eq!(names(&suggestions), vec!["apollo", "apricot"]);

        let none = engine
            .suggest_tags(
                tenant,
                &SuggestTagsRequest::new("ap").with_tag_ids(vec![apollo, Uuid::new_v4()]),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_list_tags_by_type() {
        let (_store, engine, tenant) = seeded().await;
        let colors = engine
            .list_tags_by_type(tenant, "color", None, None)
            .await
            .unwrap();
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].name, "red");
    }

    #[tokio::test]
    async fn test_tag_entity_replaces_and_reuses_tags() {
        let store = MemoryStore::new();
        let engine = TagQueryEngine::new(store.clone(), store.events());
        let tenant = Uuid::new_v4();
        let event = store
            .create_event(
                tenant,
                CreateEventRequest {
                    event_name: "offsite".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = engine
            .tag_entity(tenant, event.id, &tag_map(&[("team", &["ops", "ops", "infra"])]))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = engine
            .tag_entity(tenant, event.id, &tag_map(&[("team", &["ops"])]))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);

        let filter = TagFilterSpec::new(TagMatchMode::Any).with_type_name("team", "infra");
        assert!(engine
            .resolve_entities_by_tags(tenant, &filter, None, None)
            .await
            .unwrap()
            .is_empty());
    }
}
