//! Type-erased value containers for emitter results.
//!
//! A [`ValueBox`] is either empty, a small value stored inline in a
//! fixed-width slot, or a heap allocation. Every Rust value is trivially
//! relocatable, so inline eligibility reduces to a size and alignment
//! check against the slot.

use std::any::{Any, TypeId};
use std::fmt;
use std::mem::MaybeUninit;

/// Bytes available for inline storage. Sized for the payloads the wire
/// pipeline moves most often: integers, byte handles, small structs.
const INLINE_CAPACITY: usize = 24;
const INLINE_ALIGN: usize = 8;

/// Per-type operations for an inline-stored value.
struct InlineVt {
    type_id: fn() -> TypeId,
    type_name: fn() -> &'static str,
    /// Drop the value stored at `ptr` in place.
    drop_in_place: unsafe fn(*mut u8),
}

fn type_id_of<T: 'static>() -> TypeId {
    TypeId::of::<T>()
}

fn type_name_of<T>() -> &'static str {
    std::any::type_name::<T>()
}

unsafe fn drop_in_place_of<T>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) }
}

/// The vtable for an inline-stored `T`. The struct literal holds only
/// function pointers, so taking its address promotes it to a `'static`.
fn inline_vt<T: Send + 'static>() -> &'static InlineVt {
    &InlineVt {
        type_id: type_id_of::<T>,
        type_name: type_name_of::<T>,
        drop_in_place: drop_in_place_of::<T>,
    }
}

enum Repr {
    Nil,
    Inline {
        /// Raw storage for a value whose size and alignment fit the slot.
        /// Only ever holds a `T: Send + 'static` written by `from_value`.
        data: MaybeUninit<[u64; INLINE_CAPACITY / 8]>,
        vt: &'static InlineVt,
    },
    Heap(Box<dyn Any + Send>),
}

/// A move-only, type-erased value container.
///
/// Either empty ("nil") or active for exactly one type. Consuming the
/// value with [`downcast`](ValueBox::downcast) leaves nothing behind;
/// dropping an active box drops its value.
pub struct ValueBox {
    repr: Repr,
}

// Inline storage only ever holds values of `T: Send` (enforced by the
// bound on `from_value`); the heap variant is already Send.
unsafe impl Send for ValueBox {}

impl ValueBox {
    /// The empty box.
    pub fn nil() -> ValueBox {
        ValueBox { repr: Repr::Nil }
    }

    /// Box a value, storing it inline when it fits the slot.
    pub fn from_value<T: Send + 'static>(value: T) -> ValueBox {
        if size_of::<T>() <= INLINE_CAPACITY && align_of::<T>() <= INLINE_ALIGN {
            let mut data = MaybeUninit::<[u64; INLINE_CAPACITY / 8]>::uninit();
            unsafe { data.as_mut_ptr().cast::<T>().write(value) };
            ValueBox {
                repr: Repr::Inline {
                    data,
                    vt: inline_vt::<T>(),
                },
            }
        } else {
            ValueBox {
                repr: Repr::Heap(Box::new(value)),
            }
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.repr, Repr::Nil)
    }

    /// Whether the active value is stored in the inline slot.
    pub fn is_inline(&self) -> bool {
        matches!(self.repr, Repr::Inline { .. })
    }

    /// Take the value out as a `T`. On a type mismatch (or an empty box)
    /// the box is returned unchanged.
    pub fn downcast<T: 'static>(mut self) -> Result<T, ValueBox> {
        match std::mem::replace(&mut self.repr, Repr::Nil) {
            Repr::Nil => Err(ValueBox { repr: Repr::Nil }),
            Repr::Inline { data, vt } => {
                if (vt.type_id)() == TypeId::of::<T>() {
                    // The slot holds a valid T; read it out and hand
                    // ownership to the caller. `self.repr` is already Nil,
                    // so no drop of the slot will run.
                    Ok(unsafe { data.as_ptr().cast::<T>().read() })
                } else {
                    Err(ValueBox {
                        repr: Repr::Inline { data, vt },
                    })
                }
            }
            Repr::Heap(b) => match b.downcast::<T>() {
                Ok(v) => Ok(*v),
                Err(b) => Err(ValueBox {
                    repr: Repr::Heap(b),
                }),
            },
        }
    }

    /// Borrow the active value as a `T`, if the types match.
    pub fn view<T: 'static>(&self) -> Option<&T> {
        match &self.repr {
            Repr::Nil => None,
            Repr::Inline { data, vt } => {
                if (vt.type_id)() == TypeId::of::<T>() {
                    Some(unsafe { &*data.as_ptr().cast::<T>() })
                } else {
                    None
                }
            }
            Repr::Heap(b) => b.downcast_ref::<T>(),
        }
    }

    /// Name of the stored type, for diagnostics.
    pub fn type_name(&self) -> Option<&'static str> {
        match &self.repr {
            Repr::Nil => None,
            Repr::Inline { vt, .. } => Some((vt.type_name)()),
            Repr::Heap(_) => Some("<heap value>"),
        }
    }
}

impl Default for ValueBox {
    fn default() -> ValueBox {
        ValueBox::nil()
    }
}

impl Drop for ValueBox {
    fn drop(&mut self) {
        if let Repr::Inline { data, vt } = &mut self.repr {
            unsafe { (vt.drop_in_place)(data.as_mut_ptr().cast::<u8>()) };
        }
    }
}

impl fmt::Debug for ValueBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            None => write!(f, "ValueBox(nil)"),
            Some(name) => write!(f, "ValueBox({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn nil_box_is_nil() {
        let b = ValueBox::nil();
        assert!(b.is_nil());
        assert!(b.downcast::<i32>().is_err());
    }

    #[test]
    fn small_values_are_stored_inline() {
        let b = ValueBox::from_value(42i64);
        assert!(b.is_inline());
        assert_eq!(b.view::<i64>(), Some(&42));
        assert_eq!(b.downcast::<i64>().ok(), Some(42));
    }

    #[test]
    fn large_values_go_to_the_heap() {
        let big = [0u8; 128];
        let b = ValueBox::from_value(big);
        assert!(!b.is_inline());
        assert_eq!(b.downcast::<[u8; 128]>().ok(), Some(big));
    }

    #[test]
    fn overaligned_values_go_to_the_heap() {
        #[repr(align(16))]
        #[derive(Debug, PartialEq)]
        struct Wide(u128);
        let b = ValueBox::from_value(Wide(7));
        assert!(!b.is_inline());
        assert_eq!(b.downcast::<Wide>().ok(), Some(Wide(7)));
    }

    #[test]
    fn downcast_mismatch_preserves_the_value() {
        let b = ValueBox::from_value(String::from("kept"));
        let b = b.downcast::<i32>().unwrap_err();
        assert_eq!(b.downcast::<String>().ok().as_deref(), Some("kept"));
    }

    #[test]
    fn drop_runs_exactly_once_for_inline_values() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let drops = Arc::new(AtomicUsize::new(0));

        // Dropped while boxed.
        let b = ValueBox::from_value(Counted(drops.clone()));
        assert!(b.is_inline());
        drop(b);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // Taken out, then dropped by the caller.
        let b = ValueBox::from_value(Counted(drops.clone()));
        let v = b.downcast::<Counted>();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(v);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn string_round_trip() {
        let b = ValueBox::from_value(String::from("hello"));
        assert_eq!(b.downcast::<String>().ok().as_deref(), Some("hello"));
    }
}
