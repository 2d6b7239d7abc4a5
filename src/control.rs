//! A layered button: entity pool + layer tree + conversion cache.
//!
//! Render flow:
//! - feedbacks produce a style and per-element overrides
//! - overrides that differ from the previous render queue invalidation of
//!   exactly those elements
//! - the layer tree is converted against the cache
//!
//! Variable and composite-definition changes only queue invalidations; the
//! next render applies them.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use log::{debug, trace};
use serde::Serialize;

use crate::core::element_cache::ElementConversionCache;
use crate::core::event_bus::EventBus;
use crate::entities::{ControlChangedEvent, EntityListPool, EntityServices, StyleMap};
use crate::graphics::composite::CompositeElementStore;
use crate::graphics::convert::{ConversionContext, ConvertResult};
use crate::graphics::element::{find_element, find_element_mut, find_parent_list_mut, SomeButtonGraphicsElement};
use crate::graphics::pixels::PixelBufferRenderer;
use crate::graphics::resolver::ElementOverrides;
use crate::variables::VariablesParser;

/// Output of [`ButtonControl::render`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    /// Merged style of all active feedbacks
    pub style: StyleMap,
    #[serde(flatten)]
    pub result: ConvertResult,
}

#[derive(Debug)]
pub struct ButtonControl {
    id: String,
    pool: EntityListPool,
    events: EventBus,
    layers: Vec<SomeButtonGraphicsElement>,
    cache: ElementConversionCache,
    only_enabled: bool,
    last_overrides: ElementOverrides,
    last_used_variables: HashSet<String>,
    last_used_composites: HashSet<String>,
}

impl ButtonControl {
    pub fn new(services: Arc<EntityServices>, events: EventBus, layers: Vec<SomeButtonGraphicsElement>) -> Self {
        Self {
            id: services.control_id.clone(),
            pool: EntityListPool::new_button(services, events.clone()),
            events,
            layers,
            cache: ElementConversionCache::new(),
            only_enabled: true,
            last_overrides: ElementOverrides::new(),
            last_used_variables: HashSet::new(),
            last_used_composites: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pool(&self) -> &EntityListPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut EntityListPool {
        &mut self.pool
    }

    pub fn layers(&self) -> &[SomeButtonGraphicsElement] {
        &self.layers
    }

    pub fn cache(&self) -> &ElementConversionCache {
        &self.cache
    }

    /// Whether disabled elements are left out of the output (the default).
    pub fn set_only_enabled(&mut self, only_enabled: bool) {
        self.only_enabled = only_enabled;
    }

    fn changed(&self) {
        self.events.emit(ControlChangedEvent { control_id: self.id.clone(), redraw: true });
    }

    // ========== Rendering ==========

    pub fn render(
        &mut self,
        parser: &dyn VariablesParser,
        composites: &dyn CompositeElementStore,
        renderer: &dyn PixelBufferRenderer,
    ) -> RenderOutput {
        let (style, overrides) = self.pool.build_feedback_style().into_parts();

        let stale = changed_override_ids(&self.last_overrides, &overrides);
        if !stale.is_empty() {
            trace!("Control {}: overrides changed for {:?}", self.id, stale);
            for id in stale {
                self.cache.queue_invalidate(id);
            }
        }

        let result = ConversionContext::new(parser, composites, renderer).convert(
            &self.layers,
            &overrides,
            self.only_enabled,
            &mut self.cache,
        );

        self.last_overrides = overrides;
        self.last_used_variables = result.used_variables.clone();
        self.last_used_composites = result.used_composite_elements.clone();
        RenderOutput { style, result }
    }

    /// Queue invalidation for changed variables. Returns whether the last
    /// render used any of them.
    pub fn on_variables_changed(&mut self, changed: &HashSet<String>) -> bool {
        self.cache.queue_invalidate_variables(changed.iter());
        changed.iter().any(|id| self.last_used_variables.contains(id))
    }

    /// Queue invalidation for changed composite definitions (`connectionId:elementId`).
    /// Returns whether the last render instantiated any of them.
    pub fn on_composite_definitions_changed(&mut self, keys: &[String]) -> bool {
        self.cache.queue_invalidate_composite_type(keys.iter());
        keys.iter().any(|key| self.last_used_composites.contains(key))
    }

    // ========== Layer editing ==========

    fn target_list_mut(&mut self, parent_id: Option<&str>) -> Result<&mut Vec<SomeButtonGraphicsElement>> {
        match parent_id {
            None => Ok(&mut self.layers),
            Some(id) => match find_element_mut(&mut self.layers, id) {
                Some(SomeButtonGraphicsElement::Group(group)) => Ok(&mut group.children),
                Some(other) => bail!("Element '{}' is a {}, not a group", id, other.type_name()),
                None => bail!("No element '{}'", id),
            },
        }
    }

    /// Insert a new element at the top level or into a group. `None` appends.
    pub fn element_add(
        &mut self,
        parent_id: Option<&str>,
        element: SomeButtonGraphicsElement,
        index: Option<usize>,
    ) -> Result<()> {
        if find_element(&self.layers, element.id()).is_some() {
            bail!("Element id '{}' is already in use", element.id());
        }
        let id = element.id().to_string();
        let target = self.target_list_mut(parent_id)?;
        let index = index.unwrap_or(target.len()).min(target.len());
        target.insert(index, element);
        debug!("Control {}: added element {}", self.id, id);
        self.changed();
        Ok(())
    }

    /// Replace an element (matched by id) and invalidate every id in the old
    /// and new subtree.
    pub fn element_replace(&mut self, element: SomeButtonGraphicsElement) -> bool {
        let Some(slot) = find_element_mut(&mut self.layers, element.id()) else {
            return false;
        };
        let mut stale = Vec::new();
        collect_ids(slot, &mut stale);
        collect_ids(&element, &mut stale);
        *slot = element;

        for id in stale {
            self.cache.queue_invalidate(id);
        }
        self.changed();
        true
    }

    /// Remove an element and its children. Their cache entries go with the next pass.
    pub fn element_remove(&mut self, id: &str) -> bool {
        let Some((list, index)) = find_parent_list_mut(&mut self.layers, id) else {
            return false;
        };
        list.remove(index);
        debug!("Control {}: removed element {}", self.id, id);
        self.changed();
        true
    }

    /// Move an element to `index` of the top level or of a group. The index is clamped.
    pub fn element_move(&mut self, id: &str, parent_id: Option<&str>, index: usize) -> Result<bool> {
        let Some(element) = find_element(&self.layers, id) else {
            return Ok(false);
        };
        if let Some(parent) = parent_id {
            if parent == id || element.children().is_some_and(|c| find_element(c, parent).is_some()) {
                bail!("Cannot move '{}' into itself", id);
            }
            match find_element(&self.layers, parent) {
                Some(SomeButtonGraphicsElement::Group(_)) => {}
                Some(other) => bail!("Element '{}' is a {}, not a group", parent, other.type_name()),
                None => bail!("No element '{}'", parent),
            }
        }

        let Some((list, position)) = find_parent_list_mut(&mut self.layers, id) else {
            return Ok(false);
        };
        let element = list.remove(position);
        let target = self.target_list_mut(parent_id)?;
        let index = index.min(target.len());
        target.insert(index, element);
        self.changed();
        Ok(true)
    }

    /// Clean up all entities and drop cached elements.
    pub fn destroy(&mut self) {
        self.pool.destroy();
        self.cache.clear();
        self.last_overrides.clear();
        self.last_used_variables.clear();
        self.last_used_composites.clear();
    }
}

fn collect_ids(element: &SomeButtonGraphicsElement, out: &mut Vec<String>) {
    out.push(element.id().to_string());
    for child in element.children().into_iter().flatten() {
        collect_ids(child, out);
    }
}

/// Element ids whose override maps differ between two renders.
fn changed_override_ids(previous: &ElementOverrides, current: &ElementOverrides) -> Vec<String> {
    let mut ids: Vec<String> = current
        .iter()
        .filter(|(id, props)| previous.get(*id) != Some(*props))
        .map(|(id, _)| id.clone())
        .collect();
    ids.extend(previous.keys().filter(|id| !current.contains_key(*id)).cloned());
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::test_support::*;
    use crate::entities::{FeedbackStyleOverride, ListId};
    use crate::graphics::composite::{CompositeDefinitions, CompositeElementDefinition};
    use crate::graphics::draw::{DrawElement, DrawElementInfo};
    use crate::graphics::element::ExpressionOrValue;
    use crate::graphics::pixels::NullRenderer;
    use crate::variables::VariableStore;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn layers(value: Value) -> Vec<SomeButtonGraphicsElement> {
        serde_json::from_value(value).unwrap()
    }

    fn texts(output: &RenderOutput) -> Vec<String> {
        output
            .result
            .elements
            .iter()
            .filter_map(|e| match e {
                DrawElement::Text(t) => Some(t.text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_feedback_override_invalidates_element() {
        let env = TestEnv::new();
        let bus = EventBus::new();
        let mut control = ButtonControl::new(
            env.services.clone(),
            bus.clone(),
            layers(json!([
                {"type": "text", "id": "t1", "text": {"isExpression": false, "value": "idle"}},
                {"type": "text", "id": "t2", "text": {"isExpression": false, "value": "other"}}
            ])),
        );
        let mut model = feedback_model("f", "conn", "invertible");
        model.style_overrides = vec![FeedbackStyleOverride {
            override_id: "o1".to_string(),
            element_id: "t1".to_string(),
            element_property: "text".to_string(),
            value: ExpressionOrValue::value(json!("ON AIR")),
        }];
        control.pool_mut().entity_add(&ListId::Feedbacks, None, model, false).unwrap();

        let store = VariableStore::new();
        let parser = store.parser();
        let defs = CompositeDefinitions::new();
        assert_eq!(texts(&control.render(&parser, &defs, &NullRenderer)), vec!["idle", "other"]);

        let on = HashMap::from([("f".to_string(), json!(true))]);
        control.pool_mut().update_feedback_values("conn", &on);
        control.cache.stats().reset();
        assert_eq!(texts(&control.render(&parser, &defs, &NullRenderer)), vec!["ON AIR", "other"]);
        assert_eq!(control.cache().stats().misses(), 1);

        let off = HashMap::from([("f".to_string(), json!(false))]);
        control.pool_mut().update_feedback_values("conn", &off);
        assert_eq!(texts(&control.render(&parser, &defs, &NullRenderer)), vec!["idle", "other"]);
        assert!(bus.queue_len() >= 3);
    }

    #[test]
    fn test_variable_change_relevance() {
        let env = TestEnv::new();
        let mut control = ButtonControl::new(
            env.services.clone(),
            EventBus::new(),
            layers(json!([{"type": "text", "id": "t", "text": {"isExpression": false, "value": "$(test:a)"}}])),
        );
        let mut store = VariableStore::new();
        store.set("test:a", json!("one"));
        let defs = CompositeDefinitions::new();
        {
            let parser = store.parser();
            control.render(&parser, &defs, &NullRenderer);
        }

        assert!(!control.on_variables_changed(&HashSet::from(["test:zzz".to_string()])));
        store.set("test:a", json!("two"));
        assert!(control.on_variables_changed(&HashSet::from(["test:a".to_string()])));

        let parser = store.parser();
        assert_eq!(texts(&control.render(&parser, &defs, &NullRenderer)), vec!["two"]);
    }

    #[test]
    fn test_composite_definition_change() {
        let env = TestEnv::new();
        let mut control = ButtonControl::new(
            env.services.clone(),
            EventBus::new(),
            layers(json!([{"type": "composite", "id": "c", "connectionId": "conn", "elementId": "label"}])),
        );
        let make_def = |text: &str| CompositeElementDefinition {
            id: "label".to_string(),
            name: "Label".to_string(),
            options: Vec::new(),
            elements: layers(json!([{"type": "text", "id": "inner", "text": {"isExpression": false, "value": text}}])),
        };
        let store = VariableStore::new();
        let parser = store.parser();
        let mut defs = CompositeDefinitions::new();
        let key = defs.insert("conn", make_def("first"));

        let first = control.render(&parser, &defs, &NullRenderer);
        let DrawElement::Group(group) = &first.result.elements[0] else {
            panic!("expected composite group");
        };
        let child_id = group.children[0].id();
        assert!(child_id.starts_with("c-") && child_id.ends_with("/inner"));

        defs.insert("conn", make_def("second"));
        assert!(control.on_composite_definitions_changed(&[key]));
        assert!(!control.on_composite_definitions_changed(&["conn:other".to_string()]));
        let second = control.render(&parser, &defs, &NullRenderer);
        let DrawElement::Group(group) = &second.result.elements[0] else {
            panic!("expected composite group");
        };
        match &group.children[0] {
            DrawElement::Text(t) => assert_eq!(t.text, "second"),
            other => panic!("expected text, got {:?}", other),
        }
    }

    fn composite_text(output: &RenderOutput) -> Option<String> {
        let Some(DrawElement::Group(group)) = output.result.elements.first() else {
            return None;
        };
        group.children.iter().find_map(|e| match e {
            DrawElement::Text(t) => Some(t.text.clone()),
            _ => None,
        })
    }

    fn label_definition(id: &str, text: &str) -> CompositeElementDefinition {
        CompositeElementDefinition {
            id: id.to_string(),
            name: id.to_string(),
            options: Vec::new(),
            elements: layers(json!([{"type": "text", "id": "inner", "text": {"isExpression": false, "value": text}}])),
        }
    }

    #[test]
    fn test_composite_definition_added_later() {
        let env = TestEnv::new();
        let mut control = ButtonControl::new(
            env.services.clone(),
            EventBus::new(),
            layers(json!([{"type": "composite", "id": "c", "connectionId": "conn", "elementId": "label"}])),
        );
        let store = VariableStore::new();
        let parser = store.parser();
        let mut defs = CompositeDefinitions::new();

        assert!(control.render(&parser, &defs, &NullRenderer).result.elements.is_empty());
        // Cached as missing, still reported as used
        let again = control.render(&parser, &defs, &NullRenderer);
        assert!(again.result.elements.is_empty());
        assert!(again.result.used_composite_elements.contains("conn:label"));

        let key = defs.insert("conn", label_definition("label", "hello"));
        assert!(control.on_composite_definitions_changed(&[key]));
        let output = control.render(&parser, &defs, &NullRenderer);
        assert_eq!(composite_text(&output).as_deref(), Some("hello"));
    }

    #[test]
    fn test_replace_composite_with_other_definition() {
        let env = TestEnv::new();
        let mut control = ButtonControl::new(
            env.services.clone(),
            EventBus::new(),
            layers(json!([{"type": "composite", "id": "c", "connectionId": "conn", "elementId": "a"}])),
        );
        let store = VariableStore::new();
        let parser = store.parser();
        let mut defs = CompositeDefinitions::new();
        defs.insert("conn", label_definition("a", "from A"));
        defs.insert("conn", label_definition("b", "from B"));

        let first = control.render(&parser, &defs, &NullRenderer);
        assert_eq!(composite_text(&first).as_deref(), Some("from A"));

        let replacement =
            layers(json!([{"type": "composite", "id": "c", "connectionId": "conn", "elementId": "b"}])).remove(0);
        assert!(control.element_replace(replacement));
        let second = control.render(&parser, &defs, &NullRenderer);
        assert_eq!(composite_text(&second).as_deref(), Some("from B"));
        assert!(second.result.used_composite_elements.contains("conn:b"));

        // Children of the old definition are purged, not reused
        let DrawElement::Group(old_group) = &first.result.elements[0] else {
            panic!("expected composite group");
        };
        let old_prefix = old_group.children[0].id().trim_end_matches("inner");
        assert!(control.cache().keys_with_prefix(old_prefix).next().is_none());
    }

    #[test]
    fn test_element_edits() {
        let env = TestEnv::new();
        let mut control = ButtonControl::new(
            env.services.clone(),
            EventBus::new(),
            layers(json!([
                {"type": "group", "id": "g", "children": []},
                {"type": "box", "id": "b"}
            ])),
        );
        let text = |id: &str, value: &str| {
            layers(json!([{"type": "text", "id": id, "text": {"isExpression": false, "value": value}}])).remove(0)
        };

        control.element_add(Some("g"), text("t", "inside"), None).unwrap();
        assert!(control.element_add(None, text("t", "dup"), None).is_err());
        assert!(control.element_add(Some("b"), text("u", "x"), None).is_err());
        assert!(control.layers()[0].children().is_some_and(|c| c.len() == 1));

        // A group cannot move into itself
        assert!(control.element_move("g", Some("g"), 0).is_err());
        assert!(control.element_move("t", None, 0).unwrap());
        let ids: Vec<&str> = control.layers().iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["t", "g", "b"]);

        let store = VariableStore::new();
        let parser = store.parser();
        let defs = CompositeDefinitions::new();
        control.render(&parser, &defs, &NullRenderer);
        assert!(control.element_replace(text("t", "replaced")));
        assert!(!control.element_replace(text("missing", "x")));
        assert_eq!(texts(&control.render(&parser, &defs, &NullRenderer)), vec!["replaced"]);

        assert!(control.element_remove("b"));
        assert!(!control.element_remove("b"));
        control.render(&parser, &defs, &NullRenderer);
        assert!(!control.cache().contains("b"));
    }
}
