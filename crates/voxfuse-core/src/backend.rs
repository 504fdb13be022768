//! Execution backends for the per-element passes.
//!
//! Every pass is written once against [`Backend`]. The [`Sequential`] backend runs on the calling thread, while the
//! [`Parallel`] backend (feature `parallel`) distributes elements over rayon's global thread pool. Both must produce the same
//! results for any pass whose elements only touch disjoint state or synchronize through atomics.

/// A "parallel-for" over `N` elements.
pub trait Backend: Send + Sync {
    /// Calls `f(i)` once for every `i` in `0..n`, in no particular order.
    fn for_each_index<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Send + Sync;

    /// Calls `f(i, &mut items[i])` once for every element, in no particular order.
    fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Send + Sync;

    /// `true` if elements may run concurrently.
    fn is_parallel(&self) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Sequential;

impl Backend for Sequential {
    #[inline]
    fn for_each_index<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        for i in 0..n {
            f(i);
        }
    }

    #[inline]
    fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        for (i, item) in items.iter_mut().enumerate() {
            f(i, item);
        }
    }

    fn is_parallel(&self) -> bool {
        false
    }
}

#[cfg(feature = "parallel")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Parallel;

#[cfg(feature = "parallel")]
impl Backend for Parallel {
    fn for_each_index<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        use rayon::prelude::*;

        (0..n).into_par_iter().for_each(f);
    }

    fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        use rayon::prelude::*;

        items
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, item)| f(i, item));
    }

    fn is_parallel(&self) -> bool {
        true
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
