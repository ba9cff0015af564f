//! 内存中的元素树

use std::cell::RefCell;

use crate::driver::{ElementId, RenderSurface};
use crate::style::{StyleMap, StyleValue};

#[derive(Debug, Default)]
struct Node {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    styles: StyleMap,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

/// 测试用的元素树
///
/// 根节点是 `body`，新元素默认挂在给定父元素下。
/// 选择器只支持 `tag`、`.class`、`#id`、`*` 的组合、后代组合符与逗号列表。
#[derive(Debug)]
pub struct MockDom {
    nodes: RefCell<Vec<Node>>,
}

impl Default for MockDom {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDom {
    pub fn new() -> Self {
        let body = Node {
            tag: "body".to_string(),
            ..Default::default()
        };
        Self {
            nodes: RefCell::new(vec![body]),
        }
    }

    pub fn body(&self) -> ElementId {
        ElementId(0)
    }

    fn index(element: ElementId) -> usize {
        element.0 as usize
    }

    /// 创建元素并挂到 `parent` 下
    pub fn create_element(&self, tag: &str, parent: ElementId) -> ElementId {
        let element = self.create_detached(tag);
        self.append_child(parent, element);
        element
    }

    /// 创建不在文档中的元素
    pub fn create_detached(&self, tag: &str) -> ElementId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node {
            tag: tag.to_string(),
            ..Default::default()
        });
        ElementId(nodes.len() as u64 - 1)
    }

    pub fn append_child(&self, parent: ElementId, child: ElementId) {
        self.detach(child);
        let mut nodes = self.nodes.borrow_mut();
        nodes[Self::index(parent)].children.push(child);
        nodes[Self::index(child)].parent = Some(parent);
    }

    /// 从父元素上摘下（子树保持不变）
    pub fn detach(&self, element: ElementId) {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(parent) = nodes[Self::index(element)].parent.take() {
            nodes[Self::index(parent)].children.retain(|c| *c != element);
        }
    }

    pub fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.nodes.borrow()[Self::index(element)].parent
    }

    pub fn children(&self, element: ElementId) -> Vec<ElementId> {
        self.nodes.borrow()[Self::index(element)].children.clone()
    }

    pub fn set_id(&self, element: ElementId, id: &str) {
        self.nodes.borrow_mut()[Self::index(element)].id = Some(id.to_string());
    }

    pub fn add_class_name(&self, element: ElementId, class_name: &str) {
        let mut nodes = self.nodes.borrow_mut();
        let classes = &mut nodes[Self::index(element)].classes;
        if !classes.iter().any(|c| c == class_name) {
            classes.push(class_name.to_string());
        }
    }

    pub fn remove_class_name(&self, element: ElementId, class_name: &str) {
        self.nodes.borrow_mut()[Self::index(element)]
            .classes
            .retain(|c| c != class_name);
    }

    pub fn has_class_name(&self, element: ElementId, class_name: &str) -> bool {
        self.nodes.borrow()[Self::index(element)]
            .classes
            .iter()
            .any(|c| c == class_name)
    }

    pub fn class_names(&self, element: ElementId) -> Vec<String> {
        self.nodes.borrow()[Self::index(element)].classes.clone()
    }

    /// 元素上的全部内联样式
    pub fn styles(&self, element: ElementId) -> StyleMap {
        self.nodes.borrow()[Self::index(element)].styles.clone()
    }

    /// `ancestor` 是否包含 `descendant`（包括自身）
    pub fn contains(&self, ancestor: ElementId, descendant: ElementId) -> bool {
        let mut cursor = Some(descendant);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn is_connected(&self, element: ElementId) -> bool {
        self.contains(self.body(), element)
    }

    /// 按文档顺序返回 `root` 的后代中匹配选择器的元素（不含 `root` 自身）
    pub fn query_selector_all(&self, root: ElementId, selector: &str) -> Vec<ElementId> {
        let selectors = parse_selector_list(selector);
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> = self.children(root).into_iter().rev().collect();
        while let Some(element) = stack.pop() {
            if selectors.iter().any(|s| self.matches_complex(element, s)) {
                out.push(element);
            }
            stack.extend(self.children(element).into_iter().rev());
        }
        out
    }

    /// 元素是否匹配选择器
    pub fn matches(&self, element: ElementId, selector: &str) -> bool {
        parse_selector_list(selector)
            .iter()
            .any(|s| self.matches_complex(element, s))
    }

    fn matches_complex(&self, element: ElementId, selector: &[Compound]) -> bool {
        let Some((last, ancestors)) = selector.split_last() else {
            return false;
        };
        if !self.matches_compound(element, last) {
            return false;
        }
        let mut cursor = self.parent(element);
        let mut remaining = ancestors;
        while let Some((wanted, rest)) = remaining.split_last() {
            loop {
                let Some(current) = cursor else {
                    return false;
                };
                cursor = self.parent(current);
                if self.matches_compound(current, wanted) {
                    break;
                }
            }
            remaining = rest;
        }
        true
    }

    fn matches_compound(&self, element: ElementId, compound: &Compound) -> bool {
        let nodes = self.nodes.borrow();
        let node = &nodes[Self::index(element)];
        if let Some(tag) = &compound.tag
            && !tag.eq_ignore_ascii_case(&node.tag)
        {
            return false;
        }
        if let Some(id) = &compound.id
            && node.id.as_deref() != Some(id.as_str())
        {
            return false;
        }
        compound
            .classes
            .iter()
            .all(|class| node.classes.iter().any(|c| c == class))
    }
}

impl RenderSurface for MockDom {
    fn get_style(&self, element: ElementId, property: &str) -> Option<StyleValue> {
        self.nodes.borrow()[Self::index(element)]
            .styles
            .get(property)
            .cloned()
    }

    fn set_style(&self, element: ElementId, property: &str, value: &StyleValue) {
        self.nodes.borrow_mut()[Self::index(element)]
            .styles
            .insert(property, value.clone());
    }

    fn remove_style(&self, element: ElementId, property: &str) {
        self.nodes.borrow_mut()[Self::index(element)]
            .styles
            .remove(property);
    }

    fn add_class(&self, element: ElementId, class_name: &str) {
        self.add_class_name(element, class_name);
    }

    fn remove_class(&self, element: ElementId, class_name: &str) {
        self.remove_class_name(element, class_name);
    }

    fn has_class(&self, element: ElementId, class_name: &str) -> bool {
        self.has_class_name(element, class_name)
    }
}

/// `tag.class#id`
#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

fn parse_selector_list(selector: &str) -> Vec<Vec<Compound>> {
    selector
        .split(',')
        .map(|complex| complex.split_whitespace().map(parse_compound).collect::<Vec<_>>())
        .filter(|complex| !complex.is_empty())
        .collect()
}

fn parse_compound(input: &str) -> Compound {
    let mut compound = Compound::default();
    let mut current = String::new();
    let mut kind = ' ';
    for c in input.chars() {
        if c == '.' || c == '#' {
            push_token(kind, &mut current, &mut compound);
            kind = c;
        } else {
            current.push(c);
        }
    }
    push_token(kind, &mut current, &mut compound);
    compound
}

fn push_token(kind: char, token: &mut String, compound: &mut Compound) {
    let value = std::mem::take(token);
    match kind {
        '.' => compound.classes.push(value),
        '#' => compound.id = Some(value),
        _ if value.is_empty() || value == "*" => {}
        _ => compound.tag = Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_engine() {
        let dom = MockDom::new();
        let list = dom.create_element("ul", dom.body());
        dom.add_class_name(list, "list");
        let a = dom.create_element("li", list);
        dom.add_class_name(a, "item");
        let b = dom.create_element("li", list);
        dom.add_class_name(b, "item");
        dom.add_class_name(b, "active");
        dom.set_id(b, "second");
        let inner = dom.create_element("span", b);

        assert_eq!(dom.query_selector_all(dom.body(), ".item"), vec![a, b]);
        assert_eq!(dom.query_selector_all(dom.body(), "li.item.active"), vec![b]);
        assert_eq!(dom.query_selector_all(dom.body(), "#second span"), vec![inner]);
        assert_eq!(dom.query_selector_all(dom.body(), ".list span, .active"), vec![b, inner]);
        assert_eq!(dom.query_selector_all(list, "*").len(), 3);
        assert!(dom.query_selector_all(list, ".missing").is_empty());
    }

    #[test]
    fn test_tree_edits() {
        let dom = MockDom::new();
        let parent = dom.create_element("div", dom.body());
        let child = dom.create_element("p", parent);
        assert!(dom.contains(parent, child));
        assert!(dom.is_connected(child));

        dom.detach(parent);
        assert!(!dom.is_connected(child));
        assert!(dom.contains(parent, child));

        dom.append_child(dom.body(), child);
        assert!(dom.children(parent).is_empty());
        assert_eq!(dom.parent(child), Some(dom.body()));
    }
}
