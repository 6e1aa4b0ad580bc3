use crate::error::ServerError;

/// Node variants. A node's kind is fixed at creation; prefix splits create
/// new nodes instead of mutating the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Literal bytes.
    Static,
    /// `:name` — captures exactly one path segment.
    Parameter,
    /// `*name` — terminal, captures the remainder of the path.
    Wildcard,
}

/// A node in the compressed radix tree.
///
/// Static children are addressed through a dense byte index: `indices` maps
/// the contiguous byte range `[start_index, end_index)` to positions inside
/// `children`, so locating the next child is a single bounds check plus an
/// array read. Position zero is reserved: `children[0]` is a placeholder and
/// an index slot of zero means "no child here".
#[derive(Debug)]
struct Node<T> {
    /// Literal bytes for static nodes; the capture name (without the leading
    /// `:` or `*`) for parameter and wildcard nodes.
    prefix: String,
    /// Payload, present when a registered route terminates at this node.
    data: Option<T>,
    kind: Kind,
    children: Vec<Node<T>>,
    /// At most one parameter child per node; sibling registrations must agree
    /// on its name.
    parameter: Option<Box<Node<T>>>,
    /// At most one wildcard child per node. Wildcard nodes are leaves.
    wildcard: Option<Box<Node<T>>>,
    start_index: u16,
    end_index: u16,
    indices: Vec<u16>,
}

impl<T> Node<T> {
    fn new(kind: Kind, prefix: &str) -> Self {
        Node {
            prefix: prefix.to_owned(),
            data: None,
            kind,
            children: Vec::new(),
            parameter: None,
            wildcard: None,
            start_index: 0,
            end_index: 0,
            indices: Vec::new(),
        }
    }

    fn placeholder() -> Self {
        Node::new(Kind::Static, "")
    }

    /// An untouched node: the root before the first insertion, or a node
    /// whose prefix has not been assigned yet. `append` writes into such a
    /// node directly instead of hanging a child off it.
    fn is_virgin(&self) -> bool {
        self.prefix.is_empty()
            && self.data.is_none()
            && self.children.is_empty()
            && self.parameter.is_none()
            && self.wildcard.is_none()
            && self.kind == Kind::Static
    }

    fn static_child_pos(&self, c: u8) -> Option<usize> {
        let c = c as u16;
        if c >= self.start_index && c < self.end_index {
            let pos = self.indices[(c - self.start_index) as usize];
            if pos != 0 {
                return Some(pos as usize);
            }
        }
        None
    }

    fn static_child(&self, c: u8) -> Option<&Node<T>> {
        self.static_child_pos(c).map(|pos| &self.children[pos])
    }

    /// Register `child` under its first prefix byte, growing the byte index
    /// towards whichever side the new byte falls on. An occupied slot is
    /// overwritten in place. Positions are stored as `u16`: wide enough for
    /// a node carrying a child for every possible first byte.
    fn add_child(&mut self, child: Node<T>) -> usize {
        if self.children.is_empty() {
            self.children.push(Node::placeholder());
        }

        let c = child.prefix.as_bytes()[0] as u16;

        if self.indices.is_empty() {
            self.start_index = c;
            self.end_index = c + 1;
            self.indices = vec![0];
        } else if c < self.start_index {
            let mut grown = vec![0u16; (self.end_index - c) as usize];
            grown[(self.start_index - c) as usize..].copy_from_slice(&self.indices);
            self.indices = grown;
            self.start_index = c;
        } else if c >= self.end_index {
            self.indices.resize((c + 1 - self.start_index) as usize, 0);
            self.end_index = c + 1;
        }

        let slot = (c - self.start_index) as usize;
        match self.indices[slot] {
            0 => {
                let pos = self.children.len();
                self.indices[slot] = pos as u16;
                self.children.push(child);
                pos
            }
            pos => {
                self.children[pos as usize] = child;
                pos as usize
            }
        }
    }
}

impl<T: Clone> Node<T> {
    /// Split this node's prefix at `at`. The cut-off tail keeps everything
    /// the node owned (payload, children, index); the node itself is reduced
    /// to the common prefix and receives either `data` directly (empty
    /// `tail`) or the appended remainder of the new pattern.
    fn split(&mut self, at: usize, tail: &str, data: T) {
        let cut = Node {
            prefix: self.prefix[at..].to_owned(),
            data: self.data.take(),
            kind: Kind::Static,
            children: std::mem::take(&mut self.children),
            parameter: self.parameter.take(),
            wildcard: self.wildcard.take(),
            start_index: self.start_index,
            end_index: self.end_index,
            indices: std::mem::take(&mut self.indices),
        };

        self.prefix.truncate(at);
        self.start_index = 0;
        self.end_index = 0;
        self.add_child(cut);

        if tail.is_empty() {
            self.data = Some(data);
        } else {
            self.append(tail, data);
        }
    }

    /// Hang the remainder of a pattern off this node, creating parameter and
    /// wildcard nodes at `:` and `*` markers.
    fn append(&mut self, tail: &str, data: T) {
        let mut node = self;
        let mut tail = tail;

        loop {
            if tail.is_empty() {
                node.data = Some(data);
                return;
            }

            let marker = tail.bytes().position(|b| b == b':' || b == b'*');

            let Some(at) = marker else {
                // Purely static remainder.
                if node.is_virgin() {
                    node.prefix = tail.to_owned();
                    node.data = Some(data.clone());
                    node.add_trailing_slash(data);
                    return;
                }
                let mut child = Node::new(Kind::Static, tail);
                child.data = Some(data.clone());
                child.add_trailing_slash(data);
                node.add_child(child);
                return;
            };

            if at == 0 {
                if tail.as_bytes()[0] == b':' {
                    let end = tail
                        .bytes()
                        .position(|b| b == b'/')
                        .unwrap_or(tail.len());
                    let child = Node::new(Kind::Parameter, &tail[1..end]);
                    node.parameter = Some(Box::new(child));
                    node = node.parameter.as_deref_mut().unwrap();
                    tail = &tail[end..];
                    continue;
                }
                // Wildcards are terminal: attach the payload and stop.
                let mut child = Node::new(Kind::Wildcard, &tail[1..]);
                child.data = Some(data);
                node.wildcard = Some(Box::new(child));
                return;
            }

            // Static run in front of the marker.
            let head = &tail[..at];
            if node.is_virgin() {
                node.prefix = head.to_owned();
            } else {
                let pos = node.add_child(Node::new(Kind::Static, head));
                node = &mut node.children[pos];
            }
            tail = &tail[at..];
        }
    }

    /// Mirror a terminal static node with a `/` child carrying the same
    /// payload, so `/foo` also resolves `/foo/`. Skipped when the prefix
    /// already ends in a slash or a `/` child exists (an explicit `/foo/`
    /// registration must win over the implicit equivalence).
    fn add_trailing_slash(&mut self, data: T) {
        if self.prefix.ends_with('/')
            || self.kind == Kind::Wildcard
            || self.static_child_pos(b'/').is_some()
        {
            return;
        }
        let mut child = Node::new(Kind::Static, "/");
        child.data = Some(data);
        self.add_child(child);
    }
}

/// Name of the segment capture starting at `tail` (which excludes the `:`
/// marker itself): everything up to the next `/` or the end of the pattern.
fn segment_name(tail: &str) -> &str {
    match tail.bytes().position(|b| b == b'/') {
        Some(end) => &tail[..end],
        None => tail,
    }
}

/// Single-method radix tree mapping route patterns to payloads.
///
/// Pattern grammar: static bytes, `:name` parameter segments matching exactly
/// one path segment, and terminal `*name` wildcards matching the remainder of
/// the path including slashes. Lookup resolves statics first, then
/// parameters, then falls back to the innermost saved wildcard, and performs
/// no heap allocation: captures are emitted through a borrowed callback as
/// subslices of the input path.
#[derive(Debug)]
pub struct Tree<T> {
    root: Node<T>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Tree::new()
    }
}

impl<T> Tree<T> {
    pub fn new() -> Self {
        Tree {
            root: Node::placeholder(),
        }
    }

    /// Find the payload registered for `path`, invoking `emit` once per
    /// captured parameter in path order. Returns `None` when no route
    /// matches.
    pub fn lookup<'t, 'p>(
        &'t self,
        path: &'p str,
        emit: &mut dyn FnMut(&'t str, &'p str),
    ) -> Option<&'t T> {
        let mut node = &self.root;
        let mut path = path;
        let mut fallback: Option<(&'t Node<T>, &'p str)> = None;

        // Skip the first comparison when the starting bytes already agree.
        let mut i = usize::from(
            !path.is_empty()
                && !node.prefix.is_empty()
                && path.as_bytes()[0] == node.prefix.as_bytes()[0],
        );

        let matched = loop {
            if i == node.prefix.len() {
                // Transition point: the node's prefix is fully consumed.
                if let Some(w) = &node.wildcard {
                    fallback = Some((w, &path[i..]));
                }

                if i == path.len() {
                    break node.data.as_ref();
                }

                let c = path.as_bytes()[i];
                if let Some(child) = node.static_child(c) {
                    node = child;
                    path = &path[i..];
                    i = 1;
                    continue;
                }

                if let Some(param) = &node.parameter {
                    path = &path[i..];
                    let end = path
                        .bytes()
                        .position(|b| b == b'/')
                        .unwrap_or(path.len());
                    emit(&param.prefix, &path[..end]);

                    if end == path.len() {
                        break param.data.as_ref();
                    }
                    match param.static_child(b'/') {
                        Some(child) => {
                            node = child;
                            path = &path[end..];
                            i = 1;
                            continue;
                        }
                        None => break None,
                    }
                }

                break None;
            }

            if i == path.len() || path.as_bytes()[i] != node.prefix.as_bytes()[i] {
                break None;
            }
            i += 1;
        };

        if matched.is_some() {
            return matched;
        }
        if let Some((w, rest)) = fallback {
            emit(&w.prefix, rest);
            return w.data.as_ref();
        }
        None
    }

    /// Depth-first walk over every payload: the current node first, then
    /// static children in byte-index order, then the parameter child, then
    /// the wildcard child.
    pub fn visit(&self, f: &mut impl FnMut(&T)) {
        fn walk<T>(node: &Node<T>, f: &mut impl FnMut(&T)) {
            if let Some(d) = node.data.as_ref() {
                f(d);
            }
            for &pos in &node.indices {
                if pos != 0 {
                    walk(&node.children[pos as usize], f);
                }
            }
            if let Some(p) = node.parameter.as_deref() {
                walk(p, f);
            }
            if let Some(w) = node.wildcard.as_deref() {
                walk(w, f);
            }
        }
        walk(&self.root, f);
    }

    /// Mutable variant of [`visit`](Tree::visit); used to wrap every
    /// registered payload uniformly.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut T)) {
        fn walk<T>(node: &mut Node<T>, f: &mut impl FnMut(&mut T)) {
            if let Some(d) = node.data.as_mut() {
                f(d);
            }
            for slot in 0..node.indices.len() {
                let pos = node.indices[slot];
                if pos != 0 {
                    walk(&mut node.children[pos as usize], f);
                }
            }
            if let Some(p) = node.parameter.as_deref_mut() {
                walk(p, f);
            }
            if let Some(w) = node.wildcard.as_deref_mut() {
                walk(w, f);
            }
        }
        walk(&mut self.root, f);
    }
}

impl<T: Clone> Tree<T> {
    /// Register `data` at `pattern`. Re-registering an identical pattern
    /// overwrites the previous payload. Fails with
    /// [`ServerError::RouteConflict`] when the pattern carries a parameter
    /// name that disagrees with the one already registered at the same
    /// position.
    pub fn insert(&mut self, pattern: &str, data: T) -> Result<(), ServerError> {
        let p = pattern.as_bytes();
        let mut node = &mut self.root;
        let mut offset = 0usize;
        let mut i = 0usize;

        loop {
            let boundary = match node.kind {
                Kind::Parameter => {
                    // Same parameter route registered again.
                    if i == p.len() {
                        node.data = Some(data);
                        return Ok(());
                    }
                    p[i] == b'/'
                }
                _ => {
                    if i == p.len() {
                        if i - offset == node.prefix.len() {
                            // node: /blog|      pattern: /blog|
                            node.data = Some(data);
                        } else {
                            // node: /blog|feed  pattern: /blog|
                            node.split(i - offset, "", data);
                        }
                        return Ok(());
                    }
                    if i - offset == node.prefix.len() {
                        true
                    } else if p[i] != node.prefix.as_bytes()[i - offset] {
                        // node: /b|ag       pattern: /b|riefcase
                        node.split(i - offset, &pattern[i..], data);
                        return Ok(());
                    } else {
                        false
                    }
                }
            };

            if !boundary {
                i += 1;
                continue;
            }

            // End of the current node: descend into the child that continues
            // at pattern[i], or grow new nodes from here.
            let c = p[i];
            if let Some(pos) = node.static_child_pos(c) {
                node = &mut node.children[pos];
                offset = i;
                i += 1;
                continue;
            }

            if c == b':' && node.parameter.is_some() {
                let proposed = segment_name(&pattern[i + 1..]);
                let existing = &node.parameter.as_deref().unwrap().prefix;
                if existing != proposed {
                    return Err(ServerError::RouteConflict {
                        position: i,
                        existing: existing.clone(),
                        proposed: proposed.to_owned(),
                    });
                }
                node = node.parameter.as_deref_mut().unwrap();
                offset = i;
                continue;
            }

            node.append(&pattern[i..], data);
            return Ok(());
        }
    }
}
