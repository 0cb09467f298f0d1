// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.


//! Reference kernels
//!
//! Dense `f32` implementations of every pure operation kind. The reference
//! CPU backend dispatches to these, and constant folding uses them to
//! evaluate literal subgraphs at compile time, so folded and executed
//! results are bit-identical.

use crate::error::KernelError;
use crate::node::GraphNode;
use crate::ops::OpKind;
use crate::tensor::TensorValue;

const DEFAULT_EPSILON: f64 = 1e-5;

type KernelResult<T> = Result<T, KernelError>;

/// Whether a reference kernel exists for `kind`
pub fn supports(kind: OpKind) -> bool {
    kind.is_pure()
}

/// Evaluate `node` on the given input values
pub fn evaluate(node: &GraphNode, inputs: &[&TensorValue]) -> KernelResult<Vec<TensorValue>> {
    evaluate_kind(node.op_kind, node, inputs)
}

/// Evaluate `kind` using the attributes of `node`
///
/// Fused kinds run their components in order: the first component receives
/// the node inputs, every later one the previous component's output. Each
/// component sees only its own attributes (see [`GraphNode::component_view`]).
pub fn evaluate_kind(kind: OpKind, node: &GraphNode, inputs: &[&TensorValue]) -> KernelResult<Vec<TensorValue>> {
    if let Some(parts) = kind.components() {
        let mut current = evaluate_kind(parts[0], &node.component_view(0), inputs)?;
        for (index, part) in parts.iter().enumerate().skip(1) {
            let previous = single(current)?;
            current = evaluate_kind(*part, &node.component_view(index), &[&previous])?;
        }
        return Ok(current);
    }

    let output = match kind {
        OpKind::Constant => {
            arity(inputs, 0)?;
            node.literal().cloned().ok_or_else(|| KernelError::InvalidAttribute {
                key: crate::node::VALUE_ATTR.to_string(),
                reason: "constant without literal".to_string(),
            })?
        }
        OpKind::Identity => unary(inputs)?.clone(),
        OpKind::MatMul => {
            arity(inputs, 2)?;
            matmul(inputs[0], inputs[1])?
        }
        OpKind::Conv2d => conv2d(node, inputs)?,
        OpKind::Relu => unary(inputs)?.map(|x| x.max(0.0)),
        OpKind::Gelu => unary(inputs)?.map(gelu),
        OpKind::Silu => unary(inputs)?.map(|x| x / (1.0 + (-x).exp())),
        OpKind::Softmax => {
            let x = unary(inputs)?;
            let (_, width) = last_axis(x)?;
            let mut data = x.data().to_vec();
            if width > 0 {
                data.chunks_mut(width).for_each(softmax_in_place);
            }
            with_data(x.shape(), data)
        }
        OpKind::LayerNorm => layer_norm(node, unary(inputs)?)?,
        OpKind::RmsNorm => rms_norm(node, unary(inputs)?)?,
        OpKind::BatchNorm => batch_norm(node, unary(inputs)?)?,
        OpKind::Attention | OpKind::MultiHeadAttention => {
            let heads = node.attr_int("num_heads").unwrap_or(1);
            attention(unary(inputs)?, heads)?
        }
        OpKind::Add => binary(inputs, |a, b| a + b)?,
        OpKind::Mul => binary(inputs, |a, b| a * b)?,
        OpKind::Div => binary(inputs, |a, b| a / b)?,
        OpKind::Reshape => reshape(node, unary(inputs)?)?,
        OpKind::Transpose => transpose(node, unary(inputs)?)?,
        OpKind::ReduceSum => reduce(node, unary(inputs)?, 0.0, |acc, x| acc + x)?,
        OpKind::ReduceMax => reduce(node, unary(inputs)?, f32::NEG_INFINITY, f32::max)?,
        OpKind::Concat => concat(node, inputs)?,
        other => return Err(KernelError::Unsupported(other)),
    };
    Ok(vec![output])
}

fn single(mut outputs: Vec<TensorValue>) -> KernelResult<TensorValue> {
    if outputs.len() != 1 {
        return Err(KernelError::Arity { expected: 1, actual: outputs.len() });
    }
    Ok(outputs.remove(0))
}

fn arity(inputs: &[&TensorValue], expected: usize) -> KernelResult<()> {
    if inputs.len() != expected {
        return Err(KernelError::Arity { expected, actual: inputs.len() });
    }
    Ok(())
}

fn unary<'a>(inputs: &[&'a TensorValue]) -> KernelResult<&'a TensorValue> {
    arity(inputs, 1)?;
    Ok(inputs[0])
}

fn with_data(shape: &[usize], data: Vec<f32>) -> TensorValue {
    // Callers size `data` from `shape`
    TensorValue::new(shape.to_vec(), data).unwrap_or_else(|| TensorValue::zeros(shape.to_vec()))
}

/// Split a value into rows along its last axis
fn last_axis(x: &TensorValue) -> KernelResult<(usize, usize)> {
    let width = *x.shape().last().ok_or_else(|| KernelError::InvalidRank("expected rank >= 1".to_string()))?;
    let rows = if width == 0 { 0 } else { x.len() / width };
    Ok((rows, width))
}

fn normalize_axis(axis: i64, rank: usize) -> KernelResult<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved as usize >= rank {
        return Err(KernelError::InvalidAttribute {
            key: "axis".to_string(),
            reason: format!("{axis} out of range for rank {rank}"),
        });
    }
    Ok(resolved as usize)
}

fn epsilon(node: &GraphNode) -> f32 {
    node.attr_float("epsilon").unwrap_or(DEFAULT_EPSILON) as f32
}

fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

fn softmax_in_place(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in row.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    for x in row.iter_mut() {
        *x /= sum;
    }
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> KernelResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let (off_a, off_b) = (rank - a.len(), rank - b.len());
    (0..rank)
        .map(|i| {
            let da = if i >= off_a { a[i - off_a] } else { 1 };
            let db = if i >= off_b { b[i - off_b] } else { 1 };
            match (da, db) {
                _ if da == db => Ok(da),
                (1, _) => Ok(db),
                (_, 1) => Ok(da),
                _ => Err(KernelError::ShapeMismatch(format!("cannot broadcast {a:?} with {b:?}"))),
            }
        })
        .collect()
}

/// Row-major strides of `shape` right-aligned to `rank`; broadcast axes get 0
fn broadcast_strides(shape: &[usize], rank: usize) -> Vec<usize> {
    let offset = rank - shape.len();
    let mut strides = vec![0; rank];
    let mut acc = 1;
    for i in (0..shape.len()).rev() {
        strides[i + offset] = if shape[i] == 1 { 0 } else { acc };
        acc *= shape[i];
    }
    strides
}

fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Advance a multi-index over `shape` in row-major order
fn increment(index: &mut [usize], shape: &[usize]) {
    for d in (0..shape.len()).rev() {
        index[d] += 1;
        if index[d] < shape[d] {
            return;
        }
        index[d] = 0;
    }
}

fn binary(inputs: &[&TensorValue], f: impl Fn(f32, f32) -> f32) -> KernelResult<TensorValue> {
    arity(inputs, 2)?;
    let (a, b) = (inputs[0], inputs[1]);
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let rank = shape.len();
    let (sa, sb) = (broadcast_strides(a.shape(), rank), broadcast_strides(b.shape(), rank));
    let total: usize = shape.iter().product();

    let mut data = Vec::with_capacity(total);
    let mut index = vec![0; rank];
    for _ in 0..total {
        let oa: usize = index.iter().zip(&sa).map(|(i, s)| i * s).sum();
        let ob: usize = index.iter().zip(&sb).map(|(i, s)| i * s).sum();
        data.push(f(a.data()[oa], b.data()[ob]));
        increment(&mut index, &shape);
    }
    Ok(with_data(&shape, data))
}

/// `[.., m, k] x [k, n] -> [.., m, n]`
fn matmul(a: &TensorValue, b: &TensorValue) -> KernelResult<TensorValue> {
    let (ar, br) = (a.shape().len(), b.shape().len());
    if ar < 2 || br != 2 {
        return Err(KernelError::InvalidRank(format!("matmul expects [.., m, k] x [k, n], got {:?} x {:?}", a.shape(), b.shape())));
    }
    let (m, k) = (a.shape()[ar - 2], a.shape()[ar - 1]);
    let (kb, n) = (b.shape()[0], b.shape()[1]);
    if k != kb {
        return Err(KernelError::ShapeMismatch(format!("inner dimensions {k} and {kb} differ")));
    }
    let batch: usize = a.shape()[..ar - 2].iter().product();

    let mut out = vec![0.0; batch * m * n];
    let (x, w) = (a.data(), b.data());
    for bt in 0..batch {
        for i in 0..m {
            let row = &mut out[(bt * m + i) * n..(bt * m + i + 1) * n];
            for p in 0..k {
                let av = x[(bt * m + i) * k + p];
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell += av * w[p * n + j];
                }
            }
        }
    }
    let mut shape = a.shape()[..ar - 1].to_vec();
    shape.push(n);
    Ok(with_data(&shape, out))
}

/// NCHW input, OIHW weights, optional per-channel bias
fn conv2d(node: &GraphNode, inputs: &[&TensorValue]) -> KernelResult<TensorValue> {
    if !(2..=3).contains(&inputs.len()) {
        return Err(KernelError::Arity { expected: 2, actual: inputs.len() });
    }
    let (x, w) = (inputs[0], inputs[1]);
    let (&[n, c, h, wd], &[o, wc, kh, kw]) = (x.shape(), w.shape()) else {
        return Err(KernelError::InvalidRank(format!("conv2d expects NCHW x OIHW, got {:?} x {:?}", x.shape(), w.shape())));
    };
    if c != wc {
        return Err(KernelError::ShapeMismatch(format!("input has {c} channels, weights expect {wc}")));
    }
    let bias = inputs.get(2).map(|b| b.data());
    if bias.is_some_and(|b| b.len() != o) {
        return Err(KernelError::ShapeMismatch(format!("bias must have {o} elements")));
    }
    let stride = node.attr_int("stride").unwrap_or(1);
    let padding = node.attr_int("padding").unwrap_or(0);
    if stride < 1 || padding < 0 {
        return Err(KernelError::InvalidAttribute {
            key: "stride".to_string(),
            reason: format!("stride {stride} / padding {padding}"),
        });
    }
    let (s, p) = (stride as usize, padding as usize);
    if h + 2 * p < kh || wd + 2 * p < kw {
        return Err(KernelError::ShapeMismatch("kernel larger than padded input".to_string()));
    }
    let (oh, ow) = ((h + 2 * p - kh) / s + 1, (wd + 2 * p - kw) / s + 1);

    let (xs, ws) = (x.data(), w.data());
    let mut out = Vec::with_capacity(n * o * oh * ow);
    for b in 0..n {
        for oc in 0..o {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = bias.map_or(0.0, |bias| bias[oc]);
                    for ic in 0..c {
                        for ky in 0..kh {
                            let iy = (oy * s + ky) as isize - p as isize;
                            if iy < 0 || iy as usize >= h {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox * s + kx) as isize - p as isize;
                                if ix < 0 || ix as usize >= wd {
                                    continue;
                                }
                                let xv = xs[((b * c + ic) * h + iy as usize) * wd + ix as usize];
                                acc += xv * ws[((oc * c + ic) * kh + ky) * kw + kx];
                            }
                        }
                    }
                    out.push(acc);
                }
            }
        }
    }
    Ok(with_data(&[n, o, oh, ow], out))
}

fn layer_norm(node: &GraphNode, x: &TensorValue) -> KernelResult<TensorValue> {
    let (_, width) = last_axis(x)?;
    let eps = epsilon(node);
    let gamma = node.attr_float("gamma").unwrap_or(1.0) as f32;
    let beta = node.attr_float("beta").unwrap_or(0.0) as f32;
    let mut data = x.data().to_vec();
    if width > 0 {
        for row in data.chunks_mut(width) {
            let mean = row.iter().sum::<f32>() / width as f32;
            let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / width as f32;
            let inv = 1.0 / (var + eps).sqrt();
            row.iter_mut().for_each(|v| *v = (*v - mean) * inv * gamma + beta);
        }
    }
    Ok(with_data(x.shape(), data))
}

fn rms_norm(node: &GraphNode, x: &TensorValue) -> KernelResult<TensorValue> {
    let (_, width) = last_axis(x)?;
    let eps = epsilon(node);
    let gamma = node.attr_float("gamma").unwrap_or(1.0) as f32;
    let mut data = x.data().to_vec();
    if width > 0 {
        for row in data.chunks_mut(width) {
            let ms = row.iter().map(|v| v * v).sum::<f32>() / width as f32;
            let inv = 1.0 / (ms + eps).sqrt();
            row.iter_mut().for_each(|v| *v = *v * inv * gamma);
        }
    }
    Ok(with_data(x.shape(), data))
}

/// Per-channel normalization over every axis except axis 1
fn batch_norm(node: &GraphNode, x: &TensorValue) -> KernelResult<TensorValue> {
    let shape = x.shape();
    if shape.len() < 2 {
        return Err(KernelError::InvalidRank(format!("batch norm expects rank >= 2, got {shape:?}")));
    }
    let (n, c) = (shape[0], shape[1]);
    let inner: usize = shape[2..].iter().product();
    let count = (n * inner) as f32;
    let eps = epsilon(node);
    let mut data = x.data().to_vec();
    if count == 0.0 {
        return Ok(with_data(shape, data));
    }
    for ch in 0..c {
        let offsets = || (0..n).flat_map(move |b| (0..inner).map(move |s| (b * c + ch) * inner + s));
        let mean = offsets().map(|i| data[i]).sum::<f32>() / count;
        let var = offsets().map(|i| (data[i] - mean) * (data[i] - mean)).sum::<f32>() / count;
        let inv = 1.0 / (var + eps).sqrt();
        for i in offsets() {
            data[i] = (data[i] - mean) * inv;
        }
    }
    Ok(with_data(shape, data))
}

/// Scaled dot-product self-attention over `[.., seq, d]` split into heads
fn attention(x: &TensorValue, num_heads: i64) -> KernelResult<TensorValue> {
    let shape = x.shape();
    if shape.len() < 2 {
        return Err(KernelError::InvalidRank(format!("attention expects [.., seq, d], got {shape:?}")));
    }
    let (seq, d) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    if num_heads < 1 || d % num_heads as usize != 0 {
        return Err(KernelError::InvalidAttribute {
            key: "num_heads".to_string(),
            reason: format!("{num_heads} heads cannot split width {d}"),
        });
    }
    let heads = num_heads as usize;
    let dh = d / heads;
    let scale = 1.0 / (dh as f32).sqrt();
    let batch: usize = shape[..shape.len() - 2].iter().product();
    let xs = x.data();

    let mut out = vec![0.0; xs.len()];
    let mut scores = vec![0.0; seq];
    for bt in 0..batch {
        let base = bt * seq * d;
        for head in 0..heads {
            let at = |row: usize, t: usize| base + row * d + head * dh + t;
            for i in 0..seq {
                for (j, score) in scores.iter_mut().enumerate() {
                    *score = (0..dh).map(|t| xs[at(i, t)] * xs[at(j, t)]).sum::<f32>() * scale;
                }
                softmax_in_place(&mut scores);
                for t in 0..dh {
                    out[at(i, t)] = scores.iter().enumerate().map(|(j, s)| s * xs[at(j, t)]).sum();
                }
            }
        }
    }
    Ok(with_data(shape, out))
}

fn reshape(node: &GraphNode, x: &TensorValue) -> KernelResult<TensorValue> {
    let target = node.attr_ints("shape").ok_or_else(|| KernelError::InvalidAttribute {
        key: "shape".to_string(),
        reason: "missing".to_string(),
    })?;
    let invalid = |reason: String| KernelError::InvalidAttribute { key: "shape".to_string(), reason };

    let inferred = target.iter().filter(|d| **d == -1).count();
    if inferred > 1 || target.iter().any(|d| *d < -1) {
        return Err(invalid(format!("{target:?}")));
    }
    let known: usize = target.iter().filter(|d| **d >= 0).map(|d| *d as usize).product();
    let shape: Vec<usize> = target
        .iter()
        .map(|d| if *d == -1 { if known == 0 { 0 } else { x.len() / known } } else { *d as usize })
        .collect();
    if shape.iter().product::<usize>() != x.len() {
        return Err(KernelError::ShapeMismatch(format!("cannot reshape {:?} into {target:?}", x.shape())));
    }
    Ok(with_data(&shape, x.data().to_vec()))
}

fn transpose(node: &GraphNode, x: &TensorValue) -> KernelResult<TensorValue> {
    let rank = x.shape().len();
    let perm: Vec<usize> = match node.attr_ints("perm") {
        Some(perm) => perm.iter().map(|p| normalize_axis(*p, rank)).collect::<KernelResult<_>>()?,
        None => (0..rank).rev().collect(),
    };
    let mut seen = vec![false; rank];
    if perm.len() != rank || perm.iter().any(|p| std::mem::replace(&mut seen[*p], true)) {
        return Err(KernelError::InvalidAttribute {
            key: "perm".to_string(),
            reason: format!("{perm:?} is not a permutation of {rank} axes"),
        });
    }

    let in_strides = row_major_strides(x.shape());
    let shape: Vec<usize> = perm.iter().map(|p| x.shape()[*p]).collect();
    let mut index = vec![0; rank];
    let mut data = Vec::with_capacity(x.len());
    for _ in 0..x.len() {
        let offset: usize = index.iter().zip(&perm).map(|(i, p)| i * in_strides[*p]).sum();
        data.push(x.data()[offset]);
        increment(&mut index, &shape);
    }
    Ok(with_data(&shape, data))
}

fn reduce(node: &GraphNode, x: &TensorValue, init: f32, f: impl Fn(f32, f32) -> f32) -> KernelResult<TensorValue> {
    let shape = x.shape();
    if shape.is_empty() {
        return Err(KernelError::InvalidRank("cannot reduce a scalar".to_string()));
    }
    let axis = normalize_axis(node.attr_int("axis").unwrap_or(-1), shape.len())?;
    let keep_dims = node.attr_int("keepdims").unwrap_or(0) != 0;
    let outer: usize = shape[..axis].iter().product();
    let dim = shape[axis];
    let inner: usize = shape[axis + 1..].iter().product();

    let mut data = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        for i in 0..inner {
            data.push((0..dim).fold(init, |acc, d| f(acc, x.data()[(o * dim + d) * inner + i])));
        }
    }
    let mut out_shape = shape.to_vec();
    if keep_dims {
        out_shape[axis] = 1;
    } else {
        out_shape.remove(axis);
    }
    Ok(with_data(&out_shape, data))
}

fn concat(node: &GraphNode, inputs: &[&TensorValue]) -> KernelResult<TensorValue> {
    let first = inputs.first().ok_or(KernelError::Arity { expected: 1, actual: 0 })?;
    let rank = first.shape().len();
    let axis = normalize_axis(node.attr_int("axis").unwrap_or(0), rank)?;
    for input in inputs {
        let s = input.shape();
        let compatible = s.len() == rank && (0..rank).all(|d| d == axis || s[d] == first.shape()[d]);
        if !compatible {
            return Err(KernelError::ShapeMismatch(format!("cannot concat {:?} with {:?} on axis {axis}", first.shape(), s)));
        }
    }
    let outer: usize = first.shape()[..axis].iter().product();
    let inner: usize = first.shape()[axis + 1..].iter().product();

    let mut data = Vec::with_capacity(inputs.iter().map(|i| i.len()).sum());
    for o in 0..outer {
        for input in inputs {
            let chunk = input.shape()[axis] * inner;
            data.extend_from_slice(&input.data()[o * chunk..(o + 1) * chunk]);
        }
    }
    let mut shape = first.shape().to_vec();
    shape[axis] = inputs.iter().map(|i| i.shape()[axis]).sum();
    Ok(with_data(&shape, data))
}
