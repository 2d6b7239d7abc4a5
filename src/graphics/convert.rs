//! Layer tree conversion: declarative elements to resolved draw elements.
//!
//! A pass walks the layer tree once:
//! 1. Queued cache invalidations are applied.
//! 2. Each element is looked up by key (`prefix + id`). Hits are reused as-is,
//!    misses are resolved through an [`ExpressionResolver`] and cached.
//! 3. Groups and composites are cached as shells; their children are always
//!    walked so child invalidations surface without evicting the parent.
//! 4. Entries not visited by the pass are purged.
//! 5. Images that resolved to pixel buffers are rasterized in parallel and
//!    patched into both the output and the cache.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use log::{debug, trace};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;

use super::composite::{composite_type_key, CompositeElementStore};
use super::draw::*;
use super::element::*;
use super::pixels::{PixelBuffer, PixelBufferRenderer};
use super::resolver::{ElementOverrides, ExpressionResolver, PERCENT_SCALE};
use crate::core::element_cache::{CompositeCacheInfo, ElementCacheEntry, ElementConversionCache};
use crate::variables::VariablesParser;

/// Default text color (white).
pub const DEFAULT_TEXT_COLOR: u32 = 0xFFFFFF;

/// Output of one conversion pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResult {
    pub elements: Vec<DrawElement>,
    /// Every variable consulted by any element, cached or freshly resolved.
    pub used_variables: HashSet<String>,
    /// `connectionId:elementId` of every composite instantiated.
    pub used_composite_elements: HashSet<String>,
}

/// Collaborators a conversion pass reads from.
pub struct ConversionContext<'a> {
    parser: &'a dyn VariablesParser,
    composites: &'a dyn CompositeElementStore,
    renderer: &'a dyn PixelBufferRenderer,
}

struct PendingImage {
    key: String,
    buffers: Vec<PixelBuffer>,
}

/// Mutable state of a single pass.
struct Pass<'c> {
    cache: &'c mut ElementConversionCache,
    overrides: &'c ElementOverrides,
    only_enabled: bool,
    active: HashSet<String>,
    used_variables: HashSet<String>,
    used_composite_elements: HashSet<String>,
    pending_images: Vec<PendingImage>,
}

impl<'a> ConversionContext<'a> {
    pub fn new(
        parser: &'a dyn VariablesParser,
        composites: &'a dyn CompositeElementStore,
        renderer: &'a dyn PixelBufferRenderer,
    ) -> Self {
        Self { parser, composites, renderer }
    }

    /// Convert a layer tree, consulting and updating `cache`.
    pub fn convert(
        &self,
        elements: &[SomeButtonGraphicsElement],
        overrides: &ElementOverrides,
        only_enabled: bool,
        cache: &mut ElementConversionCache,
    ) -> ConvertResult {
        cache.apply_queued_invalidations();

        let mut pass = Pass {
            cache,
            overrides,
            only_enabled,
            active: HashSet::new(),
            used_variables: HashSet::new(),
            used_composite_elements: HashSet::new(),
            pending_images: Vec::new(),
        };

        let mut output = self.convert_list(&mut pass, self.parser, elements, "");

        pass.cache.purge_unused_elements(&pass.active);

        if !pass.pending_images.is_empty() {
            let jobs = std::mem::take(&mut pass.pending_images);
            debug!("Rasterizing {} pixel buffer image(s)", jobs.len());
            let renderer = self.renderer;
            let rendered: Vec<(String, Option<String>)> = jobs
                .into_par_iter()
                .map(|job| {
                    let data = renderer.draw_pixel_buffers(&job.buffers);
                    (job.key, data)
                })
                .collect();

            for (key, data) in rendered {
                if let Some(DrawElement::Image(image)) = find_draw_element_mut(&mut output, &key) {
                    image.base64_image = data.clone();
                }
                pass.cache.set_image_data(&key, data);
            }
        }

        ConvertResult {
            elements: output,
            used_variables: pass.used_variables,
            used_composite_elements: pass.used_composite_elements,
        }
    }

    fn convert_list(
        &self,
        pass: &mut Pass<'_>,
        parser: &dyn VariablesParser,
        elements: &[SomeButtonGraphicsElement],
        prefix: &str,
    ) -> Vec<DrawElement> {
        elements
            .iter()
            .filter_map(|element| self.convert_element(pass, parser, element, prefix))
            .collect()
    }

    fn convert_element(
        &self,
        pass: &mut Pass<'_>,
        parser: &dyn VariablesParser,
        element: &SomeButtonGraphicsElement,
        prefix: &str,
    ) -> Option<DrawElement> {
        let key = format!("{}{}", prefix, element.id());
        pass.active.insert(key.clone());

        if let Some(entry) = pass.cache.lookup(&key, pass.only_enabled) {
            pass.used_variables.extend(entry.used_variables.iter().cloned());
            let draw = entry.draw_element.clone();
            let composite = entry.composite.clone();
            if let Some(info) = &composite {
                pass.used_composite_elements.insert(info.composite_element_id.clone());
            }
            return match (draw, element) {
                (None, _) => {
                    mark_subtree_active(pass, element, prefix);
                    None
                }
                (Some(DrawElement::Group(shell)), SomeButtonGraphicsElement::Group(group)) => {
                    let children = self.convert_list(pass, parser, &group.children, prefix);
                    Some(DrawElement::Group(shell.with_children(children)))
                }
                (Some(DrawElement::Group(shell)), SomeButtonGraphicsElement::Composite(comp)) => {
                    let children = match composite {
                        Some(info) => self.expand_composite(pass, parser, comp, info),
                        None => Vec::new(),
                    };
                    Some(DrawElement::Group(shell.with_children(children)))
                }
                (Some(draw), _) => Some(draw),
            };
        }

        let all_overrides: &ElementOverrides = pass.overrides;
        let overrides = if prefix.is_empty() { all_overrides.get(element.id()) } else { None };
        let mut resolver = ExpressionResolver::new(parser, overrides);

        let enabled = match element_base(element) {
            Some(base) => resolver.get_boolean("enabled", &base.enabled, true),
            None => true,
        };
        if pass.only_enabled && !enabled {
            // Keep this entry's subtree alive so re-enabling is a cache hit
            mark_subtree_active(pass, element, prefix);
            let composite = pass.cache.get(&key).and_then(|e| e.composite.clone());
            let used = resolver.into_used_variables();
            pass.used_variables.extend(used.iter().cloned());
            pass.cache.insert(key, ElementCacheEntry { draw_element: None, used_variables: used, composite });
            return None;
        }

        match element {
            SomeButtonGraphicsElement::Group(group) => {
                let shell = resolve_group(&mut resolver, &key, enabled, &group.base, &group.bounds, 0);
                self.store(pass, &key, resolver, Some(DrawElement::Group(shell.clone())), None);
                let children = self.convert_list(pass, parser, &group.children, prefix);
                Some(DrawElement::Group(shell.with_children(children)))
            }
            SomeButtonGraphicsElement::Composite(comp) => {
                let type_key = composite_type_key(&comp.connection_id, &comp.element_id);
                pass.used_composite_elements.insert(type_key.clone());

                let Some(definition) =
                    self.composites.get_composite_element_definition(&comp.connection_id, &comp.element_id)
                else {
                    trace!("Composite definition {} not found for {}", type_key, key);
                    // Keyed by type so the definition appearing later evicts this entry
                    let info = CompositeCacheInfo {
                        composite_element_id: type_key,
                        child_id_prefix: format!("{}-/", key),
                        child_prop_overrides: HashMap::new(),
                    };
                    self.store(pass, &key, resolver, None, Some(info));
                    return None;
                };

                let mut options = HashMap::new();
                for field in &definition.options {
                    let name = format!("{}{}", COMPOSITE_OPTION_PREFIX, field.id);
                    let value = comp
                        .options
                        .get(&name)
                        .and_then(|prop| resolver.get_raw(&name, prop))
                        .unwrap_or_else(|| field.default.clone());
                    options.insert(field.id.clone(), value);
                }
                let options_hash = hash_options(&type_key, &options);
                let info = CompositeCacheInfo {
                    composite_element_id: type_key,
                    child_id_prefix: format!("{}-{:016x}/", key, options_hash),
                    child_prop_overrides: options,
                };

                let shell = resolve_group(&mut resolver, &key, enabled, &comp.base, &comp.bounds, options_hash);
                self.store(pass, &key, resolver, Some(DrawElement::Group(shell.clone())), Some(info.clone()));
                let children = self.expand_composite(pass, parser, comp, info);
                Some(DrawElement::Group(shell.with_children(children)))
            }
            _ => {
                let (draw, pending) = resolve_leaf(&mut resolver, element, &key, enabled)?;
                if let Some(buffers) = pending {
                    pass.pending_images.push(PendingImage { key: key.clone(), buffers });
                }
                self.store(pass, &key, resolver, Some(draw.clone()), None);
                Some(draw)
            }
        }
    }

    /// Convert a composite's definition elements under its child prefix.
    fn expand_composite(
        &self,
        pass: &mut Pass<'_>,
        parser: &dyn VariablesParser,
        comp: &CompositeElement,
        info: CompositeCacheInfo,
    ) -> Vec<DrawElement> {
        pass.used_composite_elements.insert(info.composite_element_id.clone());
        let Some(definition) =
            self.composites.get_composite_element_definition(&comp.connection_id, &comp.element_id)
        else {
            return Vec::new();
        };
        let child_parser = parser.create_child_parser(info.child_prop_overrides);
        self.convert_list(pass, &*child_parser, &definition.elements, &info.child_id_prefix)
    }

    fn store(
        &self,
        pass: &mut Pass<'_>,
        key: &str,
        resolver: ExpressionResolver<'_>,
        draw_element: Option<DrawElement>,
        composite: Option<CompositeCacheInfo>,
    ) {
        let used = resolver.into_used_variables();
        pass.used_variables.extend(used.iter().cloned());
        pass.cache.insert(key, ElementCacheEntry { draw_element, used_variables: used, composite });
    }
}

/// Mark every cache key below `element` as visited, without resolving anything.
fn mark_subtree_active(pass: &mut Pass<'_>, element: &SomeButtonGraphicsElement, prefix: &str) {
    let key = format!("{}{}", prefix, element.id());
    match element {
        SomeButtonGraphicsElement::Group(group) => {
            for child in &group.children {
                pass.active.insert(format!("{}{}", prefix, child.id()));
                mark_subtree_active(pass, child, prefix);
            }
        }
        SomeButtonGraphicsElement::Composite(_) => {
            if let Some(info) = pass.cache.get(&key).and_then(|e| e.composite.as_ref()) {
                pass.active.extend(pass.cache.keys_with_prefix(&info.child_id_prefix).cloned());
            }
        }
        _ => {}
    }
}

fn element_base(element: &SomeButtonGraphicsElement) -> Option<&ElementBase> {
    match element {
        SomeButtonGraphicsElement::Canvas(_) => None,
        SomeButtonGraphicsElement::Box(e) => Some(&e.base),
        SomeButtonGraphicsElement::Text(e) => Some(&e.base),
        SomeButtonGraphicsElement::Image(e) => Some(&e.base),
        SomeButtonGraphicsElement::Line(e) => Some(&e.base),
        SomeButtonGraphicsElement::Circle(e) => Some(&e.base),
        SomeButtonGraphicsElement::Group(e) => Some(&e.base),
        SomeButtonGraphicsElement::Composite(e) => Some(&e.base),
    }
}

/// Stable hash of a composite's type and resolved options, independent of map order.
fn hash_options(type_key: &str, options: &HashMap<String, Value>) -> u64 {
    let sorted: BTreeMap<&String, &Value> = options.iter().collect();
    let mut hasher = DefaultHasher::new();
    type_key.hash(&mut hasher);
    for (key, value) in sorted {
        key.hash(&mut hasher);
        value.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

fn resolve_opacity(resolver: &mut ExpressionResolver<'_>, base: &ElementBase) -> f64 {
    resolver.get_number("opacity", &base.opacity, 1.0, PERCENT_SCALE)
}

fn resolve_bounds(resolver: &mut ExpressionResolver<'_>, bounds: &ElementBounds) -> DrawBounds {
    DrawBounds {
        x: resolver.get_number("x", &bounds.x, 0.0, PERCENT_SCALE),
        y: resolver.get_number("y", &bounds.y, 0.0, PERCENT_SCALE),
        width: resolver.get_number("width", &bounds.width, 1.0, PERCENT_SCALE),
        height: resolver.get_number("height", &bounds.height, 1.0, PERCENT_SCALE),
    }
}

fn resolve_group(
    resolver: &mut ExpressionResolver<'_>,
    key: &str,
    enabled: bool,
    base: &ElementBase,
    bounds: &ElementBounds,
    salt: u64,
) -> DrawGroup {
    let opacity = resolve_opacity(resolver, base);
    let bounds = resolve_bounds(resolver, bounds);

    let mut hasher = content_hasher("group");
    enabled.hash(&mut hasher);
    hash_f64(&mut hasher, &[opacity]);
    bounds.hash(&mut hasher);
    salt.hash(&mut hasher);
    let own_hash = hasher.finish();

    DrawGroup {
        id: key.to_string(),
        enabled,
        opacity,
        bounds,
        children: Vec::new(),
        own_hash,
        content_hash: own_hash,
    }
}

/// Resolve a non-container element. Returns any pixel buffers awaiting rasterization.
fn resolve_leaf(
    resolver: &mut ExpressionResolver<'_>,
    element: &SomeButtonGraphicsElement,
    key: &str,
    enabled: bool,
) -> Option<(DrawElement, Option<Vec<PixelBuffer>>)> {
    let id = key.to_string();
    let draw = match element {
        SomeButtonGraphicsElement::Canvas(canvas) => {
            let decoration = resolver.get_enum("decoration", &canvas.decoration, Decoration::FollowDefault);
            let mut hasher = content_hasher("canvas");
            decoration.hash(&mut hasher);
            DrawElement::Canvas(DrawCanvas { id, decoration, content_hash: hasher.finish() })
        }
        SomeButtonGraphicsElement::Box(e) => {
            let opacity = resolve_opacity(resolver, &e.base);
            let bounds = resolve_bounds(resolver, &e.bounds);
            let color = resolver.get_color("color", &e.color, 0);
            let border_width = resolver.get_number("borderWidth", &e.border_width, 0.0, 1.0);
            let border_color = resolver.get_color("borderColor", &e.border_color, 0);
            let border_position = resolver.get_enum("borderPosition", &e.border_position, BorderPosition::Inside);

            let mut hasher = content_hasher("box");
            enabled.hash(&mut hasher);
            hash_f64(&mut hasher, &[opacity, border_width]);
            bounds.hash(&mut hasher);
            (color, border_color, border_position).hash(&mut hasher);
            DrawElement::Box(DrawBox {
                id,
                enabled,
                opacity,
                bounds,
                color,
                border_width,
                border_color,
                border_position,
                content_hash: hasher.finish(),
            })
        }
        SomeButtonGraphicsElement::Text(e) => {
            let opacity = resolve_opacity(resolver, &e.base);
            let bounds = resolve_bounds(resolver, &e.bounds);
            let text = resolver.get_parsed_string("text", &e.text, "");
            let font_size = resolver.get_number("fontSize", &e.font_size, 0.0, 1.0);
            let color = resolver.get_color("color", &e.color, DEFAULT_TEXT_COLOR);
            let halign = resolver.get_horizontal_alignment("halign", &e.halign, HorizontalAlignment::Center);
            let valign = resolver.get_vertical_alignment("valign", &e.valign, VerticalAlignment::Center);
            let outline_color = resolver.get_color("outlineColor", &e.outline_color, 0);

            let mut hasher = content_hasher("text");
            enabled.hash(&mut hasher);
            hash_f64(&mut hasher, &[opacity, font_size]);
            bounds.hash(&mut hasher);
            (&text, color, halign, valign, outline_color).hash(&mut hasher);
            DrawElement::Text(DrawText {
                id,
                enabled,
                opacity,
                bounds,
                text,
                font_size,
                color,
                halign,
                valign,
                outline_color,
                content_hash: hasher.finish(),
            })
        }
        SomeButtonGraphicsElement::Image(e) => {
            let opacity = resolve_opacity(resolver, &e.base);
            let bounds = resolve_bounds(resolver, &e.bounds);
            let source = resolver.get_raw("base64Image", &e.base64_image);
            let halign = resolver.get_horizontal_alignment("halign", &e.halign, HorizontalAlignment::Center);
            let valign = resolver.get_vertical_alignment("valign", &e.valign, VerticalAlignment::Center);
            let fill_mode = resolver.get_enum("fillMode", &e.fill_mode, FillMode::FitOrShrink);

            let mut hasher = content_hasher("image");
            enabled.hash(&mut hasher);
            hash_f64(&mut hasher, &[opacity]);
            bounds.hash(&mut hasher);
            (halign, valign, fill_mode).hash(&mut hasher);
            // Hash the source value, not the rendered data
            source.as_ref().map(|v| v.to_string()).hash(&mut hasher);

            let (base64_image, pending) = match source {
                Some(Value::String(url)) if !url.is_empty() => (Some(url), None),
                Some(value) => (None, PixelBuffer::from_value(&value)),
                None => (None, None),
            };
            let image = DrawElement::Image(DrawImage {
                id,
                enabled,
                opacity,
                bounds,
                base64_image,
                halign,
                valign,
                fill_mode,
                content_hash: hasher.finish(),
            });
            return Some((image, pending));
        }
        SomeButtonGraphicsElement::Line(e) => {
            let opacity = resolve_opacity(resolver, &e.base);
            let from_x = resolver.get_number("fromX", &e.from_x, 0.0, PERCENT_SCALE);
            let from_y = resolver.get_number("fromY", &e.from_y, 0.0, PERCENT_SCALE);
            let to_x = resolver.get_number("toX", &e.to_x, 1.0, PERCENT_SCALE);
            let to_y = resolver.get_number("toY", &e.to_y, 1.0, PERCENT_SCALE);
            let border_width = resolver.get_number("borderWidth", &e.border_width, 0.0, 1.0);
            let border_color = resolver.get_color("borderColor", &e.border_color, 0);

            let mut hasher = content_hasher("line");
            enabled.hash(&mut hasher);
            hash_f64(&mut hasher, &[opacity, from_x, from_y, to_x, to_y, border_width]);
            border_color.hash(&mut hasher);
            DrawElement::Line(DrawLine {
                id,
                enabled,
                opacity,
                from_x,
                from_y,
                to_x,
                to_y,
                border_width,
                border_color,
                content_hash: hasher.finish(),
            })
        }
        SomeButtonGraphicsElement::Circle(e) => {
            let opacity = resolve_opacity(resolver, &e.base);
            let bounds = resolve_bounds(resolver, &e.bounds);
            let color = resolver.get_color("color", &e.color, 0);
            let start_angle = resolver.get_number("startAngle", &e.start_angle, 0.0, 1.0);
            let end_angle = resolver.get_number("endAngle", &e.end_angle, 360.0, 1.0);
            let draw_slice = resolver.get_boolean("drawSlice", &e.draw_slice, false);
            let border_color = resolver.get_color("borderColor", &e.border_color, 0);
            let border_width = resolver.get_number("borderWidth", &e.border_width, 0.0, 1.0);
            let border_only_arc = resolver.get_boolean("borderOnlyArc", &e.border_only_arc, false);

            let mut hasher = content_hasher("circle");
            enabled.hash(&mut hasher);
            hash_f64(&mut hasher, &[opacity, start_angle, end_angle, border_width]);
            bounds.hash(&mut hasher);
            (color, draw_slice, border_color, border_only_arc).hash(&mut hasher);
            DrawElement::Circle(DrawCircle {
                id,
                enabled,
                opacity,
                bounds,
                color,
                start_angle,
                end_angle,
                draw_slice,
                border_color,
                border_width,
                border_only_arc,
                content_hash: hasher.finish(),
            })
        }
        SomeButtonGraphicsElement::Group(_) | SomeButtonGraphicsElement::Composite(_) => return None,
    };
    Some((draw, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::composite::{CompositeDefinitions, CompositeElementDefinition, CompositeOptionField};
    use crate::graphics::pixels::NullRenderer;
    use crate::variables::{ExecuteResult, ExpressionType, ParseResult, VariableStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Parser wrapper counting every resolution request.
    struct CountingParser<'a> {
        inner: Box<dyn VariablesParser + 'a>,
        calls: Arc<AtomicUsize>,
    }

    impl VariablesParser for CountingParser<'_> {
        fn execute_expression(&self, source: &str, required: Option<ExpressionType>) -> ExecuteResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.execute_expression(source, required)
        }

        fn parse_variables(&self, text: &str) -> ParseResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.parse_variables(text)
        }

        fn create_child_parser(&self, overrides: HashMap<String, Value>) -> Box<dyn VariablesParser + '_> {
            Box::new(CountingParser {
                inner: self.inner.create_child_parser(overrides),
                calls: Arc::clone(&self.calls),
            })
        }
    }

    struct FixedRenderer;

    impl PixelBufferRenderer for FixedRenderer {
        fn draw_pixel_buffers(&self, buffers: &[PixelBuffer]) -> Option<String> {
            Some(format!("data:image/png;base64,{}x{}", buffers[0].width, buffers[0].height))
        }
    }

    fn make_elements(value: Value) -> Vec<SomeButtonGraphicsElement> {
        serde_json::from_value(value).unwrap()
    }

    fn text_of(element: &DrawElement) -> &str {
        match element {
            DrawElement::Text(t) => &t.text,
            other => panic!("expected text, got {:?}", other),
        }
    }

    fn make_meter_defs() -> CompositeDefinitions {
        let mut defs = CompositeDefinitions::new();
        defs.insert(
            "conn",
            CompositeElementDefinition {
                id: "meter".to_string(),
                name: "Meter".to_string(),
                options: vec![CompositeOptionField {
                    id: "source".to_string(),
                    label: String::new(),
                    default: json!("test:a"),
                }],
                elements: make_elements(json!([
                    {"type": "text", "id": "inner1",
                     "text": {"isExpression": true, "value": "$(options:source) == 'test:a' ? $(test:a) : $(test:b)"}}
                ])),
            },
        );
        defs
    }

    #[test]
    fn test_text_variable_example() {
        let mut store = VariableStore::new();
        store.set("test:myvar", json!("HELLO"));
        let elements = make_elements(json!([
            {"type": "text", "id": "t1", "text": {"isExpression": false, "value": "Value: $(test:myvar)"}}
        ]));
        let defs = CompositeDefinitions::new();
        let mut cache = ElementConversionCache::new();

        let first = {
            let parser = store.parser();
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, &mut cache)
        };
        assert_eq!(text_of(&first.elements[0]), "Value: HELLO");
        assert!(first.used_variables.contains("test:myvar"));

        store.set("test:myvar", json!("WORLD"));
        cache.queue_invalidate_variables(["test:myvar"]);
        cache.apply_queued_invalidations();

        let second = {
            let parser = store.parser();
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, &mut cache)
        };
        assert_eq!(text_of(&second.elements[0]), "Value: WORLD");
        assert_ne!(first.elements[0].content_hash(), second.elements[0].content_hash());
    }

    #[test]
    fn test_second_pass_is_cache_hit() {
        let mut store = VariableStore::new();
        store.set("test:x", json!(20));
        let elements = make_elements(json!([
            {"type": "box", "id": "b", "x": {"isExpression": true, "value": "$(test:x) + 30"}},
            {"type": "group", "id": "g", "children": [
                {"type": "text", "id": "t", "text": {"isExpression": false, "value": "hi $(test:x)"}}
            ]}
        ]));
        let defs = CompositeDefinitions::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let parser = CountingParser { inner: Box::new(store.parser()), calls: Arc::clone(&calls) };
        let ctx = ConversionContext::new(&parser, &defs, &NullRenderer);
        let mut cache = ElementConversionCache::new();

        let first = ctx.convert(&elements, &HashMap::new(), true, &mut cache);
        let resolved_calls = calls.load(Ordering::SeqCst);
        assert!(resolved_calls > 0);
        let misses = cache.stats().misses();

        let second = ctx.convert(&elements, &HashMap::new(), true, &mut cache);
        assert_eq!(calls.load(Ordering::SeqCst), resolved_calls);
        assert_eq!(cache.stats().misses(), misses);
        assert_eq!(cache.stats().hits(), 3);

        let hashes = |r: &ConvertResult| r.elements.iter().map(|e| e.content_hash()).collect::<Vec<_>>();
        assert_eq!(hashes(&first), hashes(&second));
        assert_eq!(first.used_variables, second.used_variables);
        match &second.elements[0] {
            DrawElement::Box(b) => assert_eq!(b.bounds.x, 0.5),
            other => panic!("expected box, got {:?}", other),
        }
    }

    #[test]
    fn test_variable_invalidation_reresolves_only_dependents() {
        let mut store = VariableStore::new();
        store.set("test:a", json!("A"));
        store.set("test:b", json!("B"));
        let elements = make_elements(json!([
            {"type": "text", "id": "ta", "text": {"isExpression": false, "value": "$(test:a)"}},
            {"type": "text", "id": "tb", "text": {"isExpression": false, "value": "$(test:b)"}}
        ]));
        let defs = CompositeDefinitions::new();
        let mut cache = ElementConversionCache::new();
        {
            let parser = store.parser();
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, &mut cache);
        }

        store.set("test:a", json!("A2"));
        cache.queue_invalidate_variables(["test:a"]);
        cache.apply_queued_invalidations();
        assert!(!cache.contains("ta"));
        assert!(cache.contains("tb"));

        cache.stats().reset();
        let parser = store.parser();
        let result =
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, &mut cache);
        assert_eq!(text_of(&result.elements[0]), "A2");
        assert_eq!(text_of(&result.elements[1]), "B");
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[test]
    fn test_group_disable_preserves_children() {
        let mut store = VariableStore::new();
        store.set("test:show", json!(true));
        let elements = make_elements(json!([
            {"type": "group", "id": "g", "enabled": {"isExpression": true, "value": "$(test:show)"}, "children": [
                {"type": "box", "id": "c1"},
                {"type": "group", "id": "g2", "children": [{"type": "box", "id": "c2"}]}
            ]}
        ]));
        let defs = CompositeDefinitions::new();
        let mut cache = ElementConversionCache::new();
        let run = |store: &VariableStore, cache: &mut ElementConversionCache| {
            let parser = store.parser();
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, cache)
        };

        let shown = run(&store, &mut cache);
        assert_eq!(shown.elements.len(), 1);

        store.set("test:show", json!(false));
        cache.queue_invalidate_variables(["test:show"]);
        let hidden = run(&store, &mut cache);
        assert!(hidden.elements.is_empty());
        for key in ["c1", "g2", "c2"] {
            assert!(cache.contains(key), "{} should stay cached", key);
        }

        store.set("test:show", json!(true));
        cache.queue_invalidate_variables(["test:show"]);
        cache.stats().reset();
        let again = run(&store, &mut cache);
        assert_eq!(again.elements[0].content_hash(), shown.elements[0].content_hash());
        // Only the group itself was re-resolved
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hits(), 3);
    }

    #[test]
    fn test_disabled_elements_drawn_when_not_only_enabled() {
        let store = VariableStore::new();
        let elements = make_elements(json!([
            {"type": "box", "id": "b", "enabled": {"isExpression": false, "value": false}}
        ]));
        let defs = CompositeDefinitions::new();
        let parser = store.parser();
        let ctx = ConversionContext::new(&parser, &defs, &NullRenderer);
        let mut cache = ElementConversionCache::new();

        assert!(ctx.convert(&elements, &HashMap::new(), true, &mut cache).elements.is_empty());
        let all = ctx.convert(&elements, &HashMap::new(), false, &mut cache);
        assert_eq!(all.elements.len(), 1);
        assert!(!all.elements[0].enabled());
    }

    #[test]
    fn test_composite_ids_are_namespaced() {
        let mut store = VariableStore::new();
        store.set("test:a", json!("one"));
        store.set("test:b", json!("two"));
        let elements = make_elements(json!([
            {"type": "composite", "id": "comp1", "connectionId": "conn", "elementId": "meter"},
            {"type": "composite", "id": "comp2", "connectionId": "conn", "elementId": "meter",
             "opt:source": {"isExpression": false, "value": "test:b"}}
        ]));
        let defs = make_meter_defs();
        let mut cache = ElementConversionCache::new();
        let run = |store: &VariableStore, cache: &mut ElementConversionCache| {
            let parser = store.parser();
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, cache)
        };

        let first = run(&store, &mut cache);
        assert!(first.used_composite_elements.contains("conn:meter"));
        let child_key = |id: &str| {
            let info = cache.get(id).and_then(|e| e.composite.clone()).unwrap();
            format!("{}inner1", info.child_id_prefix)
        };
        let (k1, k2) = (child_key("comp1"), child_key("comp2"));
        assert!(k1.starts_with("comp1-") && k2.starts_with("comp2-"));
        assert_ne!(k1, k2);
        assert!(cache.contains(&k1) && cache.contains(&k2));

        let inner_text = |r: &ConvertResult, i: usize| match &r.elements[i] {
            DrawElement::Group(g) => text_of(&g.children[0]).to_string(),
            other => panic!("expected group, got {:?}", other),
        };
        assert_eq!(inner_text(&first, 0), "one");
        assert_eq!(inner_text(&first, 1), "two");

        // Only comp2's child depends on test:b
        store.set("test:b", json!("three"));
        cache.queue_invalidate_variables(["test:b"]);
        cache.apply_queued_invalidations();
        assert!(cache.contains(&k1));
        assert!(!cache.contains(&k2));

        let second = run(&store, &mut cache);
        assert_eq!(inner_text(&second, 0), "one");
        assert_eq!(inner_text(&second, 1), "three");
        assert_eq!(second.elements[0].content_hash(), first.elements[0].content_hash());
    }

    #[test]
    fn test_missing_composite_contributes_nothing() {
        let store = VariableStore::new();
        let elements = make_elements(json!([
            {"type": "composite", "id": "c", "connectionId": "gone", "elementId": "x"},
            {"type": "box", "id": "b"}
        ]));
        let defs = CompositeDefinitions::new();
        let parser = store.parser();
        let mut cache = ElementConversionCache::new();
        let result =
            ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &HashMap::new(), true, &mut cache);

        assert_eq!(result.elements.len(), 1);
        assert!(result.used_composite_elements.contains("gone:x"));
    }

    #[test]
    fn test_override_applies_to_top_level_element() {
        let store = VariableStore::new();
        let elements = make_elements(json!([
            {"type": "text", "id": "t", "text": {"isExpression": false, "value": "base"}}
        ]));
        let overrides = ElementOverrides::from([(
            "t".to_string(),
            HashMap::from([("text".to_string(), ExpressionOrValue::Value(json!("pressed")))]),
        )]);
        let defs = CompositeDefinitions::new();
        let parser = store.parser();
        let mut cache = ElementConversionCache::new();
        let result = ConversionContext::new(&parser, &defs, &NullRenderer).convert(&elements, &overrides, true, &mut cache);
        assert_eq!(text_of(&result.elements[0]), "pressed");
    }

    #[test]
    fn test_pixel_buffers_rasterized_after_pass() {
        let mut store = VariableStore::new();
        store.set("test:img", json!({"width": 4, "height": 2, "buffer": "AAAA"}));
        let elements = make_elements(json!([
            {"type": "group", "id": "g", "children": [
                {"type": "image", "id": "img", "base64Image": {"isExpression": true, "value": "$(test:img)"}}
            ]}
        ]));
        let defs = CompositeDefinitions::new();
        let parser = store.parser();
        let ctx = ConversionContext::new(&parser, &defs, &FixedRenderer);
        let mut cache = ElementConversionCache::new();

        let result = ctx.convert(&elements, &HashMap::new(), true, &mut cache);
        let DrawElement::Group(group) = &result.elements[0] else { panic!("expected group") };
        let DrawElement::Image(image) = &group.children[0] else { panic!("expected image") };
        assert_eq!(image.base64_image.as_deref(), Some("data:image/png;base64,4x2"));

        match cache.get("img").and_then(|e| e.draw_element.as_ref()) {
            Some(DrawElement::Image(cached)) => assert_eq!(cached.base64_image, image.base64_image),
            other => panic!("expected cached image, got {:?}", other),
        }
    }

    #[test]
    fn test_removed_elements_purged() {
        let store = VariableStore::new();
        let defs = CompositeDefinitions::new();
        let parser = store.parser();
        let ctx = ConversionContext::new(&parser, &defs, &NullRenderer);
        let mut cache = ElementConversionCache::new();

        let before = make_elements(json!([
            {"type": "group", "id": "g", "children": [{"type": "box", "id": "c"}]},
            {"type": "box", "id": "b"}
        ]));
        ctx.convert(&before, &HashMap::new(), true, &mut cache);
        assert_eq!(cache.len(), 3);

        let after = make_elements(json!([{"type": "box", "id": "b"}]));
        ctx.convert(&after, &HashMap::new(), true, &mut cache);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
    }
}
