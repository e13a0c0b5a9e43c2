//! Nested integration states.
//!
//! A [`State`] is a tree of numeric arrays (sequences and string-keyed
//! mappings of arrays, nested to any finite depth). The integrator itself
//! works on a flat buffer; [`Layout`] is the structure of a state without its
//! data and converts between the two forms. Flattening is depth-first, with
//! mapping entries in key order, so a layout fixes a bijection between trees
//! and buffers.

use crate::error::{OdeError, Result};
use crate::traits::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dense row-major array. A scalar has an empty shape and one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

impl<T: Scalar> Array<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(OdeError::ShapeMismatch {
                expected: format!("{expected} elements for shape {shape:?}"),
                found: format!("{} elements", data.len()),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: T) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn vector(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum State<T> {
    Leaf(Array<T>),
    Sequence(Vec<State<T>>),
    Mapping(BTreeMap<String, State<T>>),
}

/// Structure of a [`State`]: leaf shapes and container nesting, no data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    Leaf(Vec<usize>),
    Sequence(Vec<Layout>),
    Mapping(Vec<(String, Layout)>),
}

impl<T: Scalar> State<T> {
    pub fn scalar(value: T) -> Self {
        State::Leaf(Array::scalar(value))
    }

    pub fn vector(data: Vec<T>) -> Self {
        State::Leaf(Array::vector(data))
    }

    pub fn array(shape: Vec<usize>, data: Vec<T>) -> Result<Self> {
        Array::new(shape, data).map(State::Leaf)
    }

    pub fn sequence(items: Vec<State<T>>) -> Self {
        State::Sequence(items)
    }

    pub fn mapping<K: Into<String>>(entries: impl IntoIterator<Item = (K, State<T>)>) -> Self {
        State::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// An empty sequence; the parameter pack of a system without parameters.
    pub fn empty() -> Self {
        State::Sequence(Vec::new())
    }

    /// Total number of scalars in the tree.
    pub fn len(&self) -> usize {
        match self {
            State::Leaf(array) => array.len(),
            State::Sequence(items) => items.iter().map(State::len).sum(),
            State::Mapping(entries) => entries.values().map(State::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_leaf(&self) -> Option<&Array<T>> {
        match self {
            State::Leaf(array) => Some(array),
            _ => None,
        }
    }

    /// Child `index` of a sequence.
    pub fn item(&self, index: usize) -> Option<&State<T>> {
        match self {
            State::Sequence(items) => items.get(index),
            _ => None,
        }
    }

    /// Entry `key` of a mapping.
    pub fn field(&self, key: &str) -> Option<&State<T>> {
        match self {
            State::Mapping(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            State::Leaf(array) => Layout::Leaf(array.shape.clone()),
            State::Sequence(items) => Layout::Sequence(items.iter().map(State::layout).collect()),
            State::Mapping(entries) => Layout::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.layout()))
                    .collect(),
            ),
        }
    }

    pub fn flatten(&self) -> (Layout, Vec<T>) {
        (self.layout(), self.to_flat())
    }

    pub fn to_flat(&self) -> Vec<T> {
        let mut flat = Vec::with_capacity(self.len());
        self.extend_flat(&mut flat);
        flat
    }

    fn extend_flat(&self, flat: &mut Vec<T>) {
        match self {
            State::Leaf(array) => flat.extend_from_slice(&array.data),
            State::Sequence(items) => items.iter().for_each(|s| s.extend_flat(flat)),
            State::Mapping(entries) => entries.values().for_each(|s| s.extend_flat(flat)),
        }
    }

    /// Writes the leaves into `out` in flattening order.
    /// Returns the number of scalars written.
    pub fn write_flat(&self, out: &mut [T]) -> usize {
        match self {
            State::Leaf(array) => {
                out[..array.len()].copy_from_slice(&array.data);
                array.len()
            }
            State::Sequence(items) => items
                .iter()
                .fold(0, |offset, s| offset + s.write_flat(&mut out[offset..])),
            State::Mapping(entries) => entries
                .values()
                .fold(0, |offset, s| offset + s.write_flat(&mut out[offset..])),
        }
    }

    pub fn same_structure(&self, other: &State<T>) -> bool {
        match (self, other) {
            (State::Leaf(a), State::Leaf(b)) => a.shape == b.shape,
            (State::Sequence(a), State::Sequence(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y))
            }
            (State::Mapping(a), State::Mapping(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, x), (kb, y))| ka == kb && x.same_structure(y))
            }
            _ => false,
        }
    }

    /// Applies `f` to every scalar, keeping the structure.
    pub fn map<U: Scalar>(&self, f: impl Fn(T) -> U) -> State<U> {
        self.map_ref(&f)
    }

    fn map_ref<U: Scalar, F: Fn(T) -> U>(&self, f: &F) -> State<U> {
        match self {
            State::Leaf(array) => State::Leaf(Array {
                shape: array.shape.clone(),
                data: array.data.iter().map(|&v| f(v)).collect(),
            }),
            State::Sequence(items) => State::Sequence(items.iter().map(|s| s.map_ref(f)).collect()),
            State::Mapping(entries) => State::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.map_ref(f)))
                    .collect(),
            ),
        }
    }

    /// Combines two states of identical structure pointwise.
    pub fn zip_map(&self, other: &State<T>, f: impl Fn(T, T) -> T) -> Result<State<T>> {
        if !self.same_structure(other) {
            return Err(OdeError::ShapeMismatch {
                expected: self.layout().to_string(),
                found: other.layout().to_string(),
            });
        }
        Ok(self.zip_unchecked(other, &f))
    }

    fn zip_unchecked<F: Fn(T, T) -> T>(&self, other: &State<T>, f: &F) -> State<T> {
        match (self, other) {
            (State::Leaf(a), State::Leaf(b)) => State::Leaf(Array {
                shape: a.shape.clone(),
                data: a.data.iter().zip(&b.data).map(|(&x, &y)| f(x, y)).collect(),
            }),
            (State::Sequence(a), State::Sequence(b)) => State::Sequence(
                a.iter()
                    .zip(b)
                    .map(|(x, y)| x.zip_unchecked(y, f))
                    .collect(),
            ),
            (State::Mapping(a), State::Mapping(b)) => State::Mapping(
                a.iter()
                    .zip(b.values())
                    .map(|((k, x), y)| (k.clone(), x.zip_unchecked(y, f)))
                    .collect(),
            ),
            // Structure was checked by the caller.
            _ => self.clone(),
        }
    }

    pub fn zeros_like(&self) -> State<T> {
        self.map(|_| T::zero())
    }

    pub fn add(&self, other: &State<T>) -> Result<State<T>> {
        self.zip_map(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &State<T>) -> Result<State<T>> {
        self.zip_map(other, |a, b| a - b)
    }

    pub fn scale(&self, alpha: T) -> State<T> {
        self.map(|v| alpha * v)
    }

    /// `self + alpha * other`.
    pub fn axpy(&self, alpha: T, other: &State<T>) -> Result<State<T>> {
        self.zip_map(other, |a, b| a + alpha * b)
    }

    pub fn dot(&self, other: &State<T>) -> Result<T> {
        if !self.same_structure(other) {
            return Err(OdeError::ShapeMismatch {
                expected: self.layout().to_string(),
                found: other.layout().to_string(),
            });
        }
        Ok(self
            .to_flat()
            .into_iter()
            .zip(other.to_flat())
            .fold(T::zero(), |acc, (a, b)| acc + a * b))
    }

    /// Root-mean-square over every scalar of the tree; zero for an empty tree.
    pub fn rms_norm(&self) -> T {
        let flat = self.to_flat();
        if flat.is_empty() {
            return T::zero();
        }
        let sum = flat.iter().fold(T::zero(), |acc, &v| acc + v * v);
        (sum / T::lit(flat.len() as f64)).sqrt()
    }
}

impl Layout {
    /// Number of scalars a state with this layout holds.
    pub fn size(&self) -> usize {
        match self {
            Layout::Leaf(shape) => shape.iter().product(),
            Layout::Sequence(items) => items.iter().map(Layout::size).sum(),
            Layout::Mapping(entries) => entries.iter().map(|(_, l)| l.size()).sum(),
        }
    }

    /// True when `state` has exactly this structure and every leaf holds as
    /// many scalars as its shape implies.
    pub fn matches<T: Scalar>(&self, state: &State<T>) -> bool {
        match (self, state) {
            (Layout::Leaf(shape), State::Leaf(array)) => {
                *shape == array.shape && array.len() == self.size()
            }
            (Layout::Sequence(layouts), State::Sequence(items)) => {
                layouts.len() == items.len()
                    && layouts.iter().zip(items).all(|(l, s)| l.matches(s))
            }
            (Layout::Mapping(layouts), State::Mapping(entries)) => {
                layouts.len() == entries.len()
                    && layouts
                        .iter()
                        .zip(entries)
                        .all(|((kl, l), (ks, s))| kl == ks && l.matches(s))
            }
            _ => false,
        }
    }

    pub fn unflatten<T: Scalar>(&self, flat: &[T]) -> Result<State<T>> {
        if flat.len() != self.size() {
            return Err(OdeError::ShapeMismatch {
                expected: format!("{} scalars for layout {}", self.size(), self),
                found: format!("{} scalars", flat.len()),
            });
        }
        let mut offset = 0;
        Ok(self.build(flat, &mut offset))
    }

    fn build<T: Scalar>(&self, flat: &[T], offset: &mut usize) -> State<T> {
        match self {
            Layout::Leaf(shape) => {
                let len: usize = shape.iter().product();
                let data = flat[*offset..*offset + len].to_vec();
                *offset += len;
                State::Leaf(Array {
                    shape: shape.clone(),
                    data,
                })
            }
            Layout::Sequence(items) => {
                State::Sequence(items.iter().map(|l| l.build(flat, offset)).collect())
            }
            Layout::Mapping(entries) => State::Mapping(
                entries
                    .iter()
                    .map(|(k, l)| (k.clone(), l.build(flat, offset)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Leaf(shape) => write!(f, "{shape:?}"),
            Layout::Sequence(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Layout::Mapping(entries) => {
                write!(f, "{{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
        }
    }
}
