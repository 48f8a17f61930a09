//! Syntax tree for Quark.
//!
//! Every node is a generic `{kind, token, children}` triple stored in an
//! arena and addressed by a stable `NodeId`. Side tables built by the
//! analyzer (types, captures, bindings) are keyed by `NodeId`, so two
//! structurally identical lambdas stay distinct through the pipeline.
//!
//! Child layout per kind:
//!
//! | kind            | token            | children                                   |
//! |-----------------|------------------|--------------------------------------------|
//! | CompilationUnit | -                | statements                                 |
//! | Block           | -                | statements                                 |
//! | Function        | name             | Parameters, Block                          |
//! | Parameters      | -                | Parameter*                                 |
//! | Parameter       | name             | TypeAnnotation?                            |
//! | TypeAnnotation  | type name        | TypeAnnotation* (element types)            |
//! | VarDecl         | name             | TypeAnnotation, value                      |
//! | FunctionCall    | -                | callee, Arguments                          |
//! | Arguments       | -                | arguments                                  |
//! | Operator        | operator         | operand (unary) or lhs, rhs (binary)       |
//! | Member          | member name      | object                                     |
//! | Index           | `[`              | target, index                              |
//! | Pipe            | `\|`             | input, target                              |
//! | Ternary         | `if`             | condition, then value, else value          |
//! | If              | `if` / `elseif`  | condition, Block, (If \| Block)*           |
//! | When            | `when`           | scrutinee, Pattern*                        |
//! | Pattern         | `->`             | alternatives..., result                    |
//! | ResultPattern   | `ok` / `err`     | Identifier or Wildcard                     |
//! | For             | `for`            | Identifier, iterable, Block                |
//! | While           | `while`          | condition, Block                           |
//! | Lambda          | `fn`             | Parameters, body                           |
//! | List / Vector   | opening token    | elements                                   |
//! | Dict            | opening token    | DictEntry*                                 |
//! | DictEntry       | key              | value                                      |
//! | ResultValue     | `ok` / `err`     | value                                      |
//! | Module          | name             | Block                                      |
//! | Use             | name or path     | -                                          |

use std::fmt::Write as _;

use crate::token::Token;

/// Stable index of a node inside an [`Ast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    CompilationUnit,
    Block,
    Function,
    Parameters,
    Parameter,
    TypeAnnotation,
    VarDecl,
    FunctionCall,
    Arguments,
    Identifier,
    Literal,
    Wildcard,
    Operator,
    Member,
    Index,
    Pipe,
    Ternary,
    If,
    When,
    Pattern,
    ResultPattern,
    For,
    While,
    Lambda,
    List,
    Vector,
    Dict,
    DictEntry,
    ResultValue,
    Module,
    Use,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub token: Option<Token>,
    pub children: Vec<NodeId>,
}

/// Node arena shared by the parser, analyzer and lowering.
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Ast {
    pub fn new() -> Self {
        Ast { nodes: Vec::new() }
    }

    pub fn add(&mut self, kind: NodeKind, token: Option<Token>, children: Vec<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            token,
            children,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node(id).kind
    }

    pub fn token(&self, id: NodeId) -> Option<&Token> {
        self.node(id).token.as_ref()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn child(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.node(id).children.get(index).copied()
    }

    pub fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        self.nodes[id.index()].children = children;
    }

    /// Literal text of the node's token, or `""` when it has none.
    pub fn literal(&self, id: NodeId) -> &str {
        self.token(id).map(|t| t.literal.as_str()).unwrap_or("")
    }

    /// Source position of a node: its own token, else its first
    /// positioned descendant, else `(0, 0)`.
    pub fn position(&self, id: NodeId) -> (usize, usize) {
        if let Some(token) = self.token(id) {
            return (token.line, token.column);
        }
        self.children(id)
            .iter()
            .map(|&child| self.position(child))
            .find(|&(line, _)| line > 0)
            .unwrap_or((0, 0))
    }

    /// Indented, one-node-per-line rendering used by `quark parse`.
    pub fn dump(&self, root: NodeId) -> String {
        let mut out = String::new();
        self.dump_into(root, 0, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let _ = write!(out, "{}{:?}", "  ".repeat(depth), node.kind);
        if let Some(token) = &node.token {
            let _ = write!(out, " '{}'", token.literal.escape_debug());
        }
        out.push('\n');
        for &child in &node.children {
            self.dump_into(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenKind;

    #[test]
    fn identical_nodes_keep_distinct_ids() {
        let mut ast = Ast::new();
        let a = ast.add(
            NodeKind::Identifier,
            Some(Token::new(TokenKind::Ident, "x", 1, 1)),
            Vec::new(),
        );
        let b = ast.add(
            NodeKind::Identifier,
            Some(Token::new(TokenKind::Ident, "x", 1, 1)),
            Vec::new(),
        );
        assert_ne!(a, b);
        assert_eq!(ast.node(a), ast.node(b));
    }

    #[test]
    fn position_falls_back_to_children() {
        let mut ast = Ast::new();
        let arg = ast.add(
            NodeKind::Literal,
            Some(Token::new(TokenKind::Int, "1", 3, 7)),
            Vec::new(),
        );
        let args = ast.add(NodeKind::Arguments, None, vec![arg]);
        assert_eq!(ast.position(args), (3, 7));
        let dump = ast.dump(args);
        assert!(dump.starts_with("Arguments\n  Literal '1'"));
    }
}
