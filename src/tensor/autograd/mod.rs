use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::tensor::numeric::*;
use crate::tensor::{RawTensor, RcTensor, TensorList};

/// signature: vjp(inputs, output, grad) -> grad @ J(inputs), one entry per input.
/// Entries are `None` for inputs that do not need a gradient.
pub(in crate::tensor) type VjpFn<T> =
    fn(&TensorList<T>, &RawTensor<T>, &RcTensor<T>) -> Vec<Option<RcTensor<T>>>;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = Cell::new(true);
}

/// Runs `f` without recording any backward nodes, e.g. for evaluation.
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            GRAD_ENABLED.with(|enabled| enabled.set(self.0));
        }
    }

    let _restore = Restore(GRAD_ENABLED.with(|enabled| enabled.replace(false)));
    f()
}

pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| enabled.get())
}

#[derive(Clone)]
pub(in crate::tensor) struct Derivative<T: Numeric> {
    inputs: TensorList<T>,
    vector_jacobian_product: VjpFn<T>,
    debug_info: &'static str,
}

impl<T: Numeric> fmt::Debug for Derivative<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivative")
            .field("op", &self.debug_info)
            .field(
                "inputs",
                &self
                    .inputs
                    .iter()
                    .map(|input| input.shape().to_vec())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<T: Numeric> Derivative<T> {
    /// Wraps the result of an op, recording how to push gradients back to
    /// `inputs` if any of them needs one.
    pub fn attach(
        mut raw_tensor: RawTensor<T>,
        inputs: TensorList<T>,
        vector_jacobian_product: VjpFn<T>,
        debug_info: &'static str,
    ) -> RcTensor<T> {
        if is_grad_enabled() && inputs.iter().any(|input| input.requires_grad) {
            raw_tensor.requires_grad = true;
            raw_tensor.grad_fn = Some(Derivative {
                inputs,
                vector_jacobian_product,
                debug_info,
            });
        }
        RcTensor::from_raw(raw_tensor)
    }

    fn push_grad(&self, output: &RawTensor<T>, grad: &RcTensor<T>) {
        let input_grads = (self.vector_jacobian_product)(&self.inputs, output, grad);
        debug_assert_eq!(input_grads.len(), self.inputs.len(), "{}", self.debug_info);
        for (input, input_grad) in self.inputs.iter().zip(input_grads) {
            if let Some(input_grad) = input_grad {
                if !input.requires_grad {
                    continue;
                }
                debug_assert_eq!(
                    input_grad.shape(),
                    input.shape(),
                    "grad and input must have the same shape, op: {}",
                    self.debug_info
                );
                input.update_grad(input_grad);
            }
        }
    }
}

/// Nodes reachable from `root` through tensors that need a gradient, every
/// node placed after all of its inputs.
fn topological_order<T: Numeric>(root: &RcTensor<T>) -> TensorList<T> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    // (node, inputs already expanded)
    let mut stack = vec![(root.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !seen.insert(Rc::as_ptr(&node.0)) {
            continue;
        }
        let inputs = node
            .grad_fn
            .as_ref()
            .map(|d| d.inputs.clone())
            .unwrap_or_default();
        stack.push((node, true));
        for input in inputs.into_iter().filter(|input| input.requires_grad) {
            if !seen.contains(&Rc::as_ptr(&input.0)) {
                stack.push((input, false));
            }
        }
    }
    order
}

/// Reverse mode pass from a single element `root`, accumulating into `.grad`
/// of every tensor that needs one.
pub(in crate::tensor) fn backward<T: Numeric>(root: &RcTensor<T>) -> Result<()> {
    if root.count() != 1 {
        return Err(Error::NonScalarBackward(root.shape().to_vec()));
    }
    if !root.requires_grad {
        return Ok(());
    }
    root.update_grad(RcTensor::new_with_filler(root.shape().to_vec(), T::one()));
    for node in topological_order(root).iter().rev() {
        let derivative = match node.grad_fn.as_ref() {
            Some(d) => d,
            None => continue,
        };
        let grad = node.grad.borrow().clone();
        if let Some(grad) = grad {
            derivative.push_grad(&node.0, &grad);
        }
    }
    Ok(())
}

#[test]
fn test_no_grad_skips_graph() {
    let weights = RcTensor::<f64>::parameter(vec![1.0, 2.0], vec![2]);
    let out = no_grad(|| (&weights * &weights).sum());
    assert!(out.grad_fn.is_none());
    assert!(is_grad_enabled());
    let out = (&weights * &weights).sum();
    assert!(out.grad_fn.is_some());
}

#[test]
fn test_shared_input_accumulates() {
    // d/dx (x * x) = 2x, both branches point at the same leaf
    let x = RcTensor::<f64>::parameter(vec![3.0, -1.0], vec![2]);
    (&x * &x).sum().backward().unwrap();
    assert_eq!(x.grad().unwrap(), RcTensor::<f64>::from([6.0, -2.0]));
}

#[test]
fn test_diamond_graph_visits_each_node_once() {
    // y = x + x; z = y * y  => dz/dx = 2y * 2 = 8x
    let x = RcTensor::<f64>::parameter(vec![0.5], vec![1]);
    let y = &x + &x;
    let z = (&y * &y).sum();
    z.backward().unwrap();
    assert_eq!(x.grad().unwrap(), RcTensor::<f64>::from([4.0]));
}

#[test]
fn test_backward_rejects_non_scalar() {
    let x = RcTensor::<f64>::parameter(vec![1.0, 2.0], vec![2]);
    let y = &x * &x;
    assert!(matches!(y.backward(), Err(Error::NonScalarBackward(_))));
}
