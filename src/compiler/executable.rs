//! CompiledConcat: mmap'd executable code + the config it was built from.
//!
//! Wraps a block of JIT-compiled machine code implementing one specialized
//! concat routine. The code lives in an executable memory region (via mmap)
//! and is called through a function pointer.

use std::mem::offset_of;

use crate::compiler::planner::KernelConfig;
use crate::types::{ConcatError, ConcatResult};

/// Per-invocation argument block read by the generated routine.
///
/// `src` and `nb_ic` must each hold at least `n_inputs` entries, in planning
/// order; `nb_ic[i]` is input `i`'s channel count divided by the block.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ConcatCallArgs {
    pub src: *const *const u8,
    pub nb_ic: *const i32,
    pub dst: *mut u8,
}

impl ConcatCallArgs {
    pub const SRC_OFFSET: usize = offset_of!(ConcatCallArgs, src);
    pub const NB_IC_OFFSET: usize = offset_of!(ConcatCallArgs, nb_ic);
    pub const DST_OFFSET: usize = offset_of!(ConcatCallArgs, dst);
}

/// Signature of a generated concat routine.
pub type ConcatKernelFn = unsafe extern "C" fn(*const ConcatCallArgs);

/// A JIT-compiled concat routine.
pub struct CompiledConcat {
    code: ExecutableBuffer,
    config: KernelConfig,
}

impl CompiledConcat {
    /// Create a CompiledConcat from raw machine code bytes.
    pub fn from_code(code_bytes: &[u8], config: KernelConfig) -> ConcatResult<Self> {
        let code = ExecutableBuffer::new(code_bytes)?;
        Ok(CompiledConcat { code, config })
    }

    /// The configuration this routine is specialized for.
    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Size of the mapped code region in bytes (page-rounded).
    pub fn code_size(&self) -> usize {
        self.code.len
    }

    /// Get the entry point function pointer.
    ///
    /// # Safety
    /// The code must be a valid routine for the host CPU.
    #[inline]
    pub unsafe fn entry_point(&self) -> ConcatKernelFn {
        debug_assert!(!self.code.ptr.is_null());
        std::mem::transmute::<*mut u8, ConcatKernelFn>(self.code.ptr)
    }

    /// Run the routine once.
    ///
    /// # Safety
    /// `args.src`/`args.nb_ic` must hold `config().n_inputs` entries, every
    /// source must hold `nb_ic[i] * block` elements, the destination must
    /// hold the sum of them, and the host must support the routine's ISA.
    #[inline]
    pub unsafe fn call(&self, args: &ConcatCallArgs) {
        let f = self.entry_point();
        f(args as *const ConcatCallArgs);
    }
}

impl std::fmt::Debug for CompiledConcat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledConcat")
            .field("config", &self.config)
            .field("code_size", &self.code.len)
            .finish()
    }
}

/// An executable memory buffer backed by mmap.
struct ExecutableBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: ExecutableBuffer owns its mmap'd memory exclusively. The pointer is
// never aliased and the buffer is immutable (PROT_READ|PROT_EXEC) after construction.
unsafe impl Send for ExecutableBuffer {}
unsafe impl Sync for ExecutableBuffer {}

impl ExecutableBuffer {
    /// Allocate an executable memory region and copy code into it.
    #[cfg(unix)]
    fn new(code: &[u8]) -> ConcatResult<Self> {
        if code.is_empty() {
            return Err(ConcatError::Compile("empty code buffer".into()));
        }

        let page_size = page_size();
        let len = (code.len() + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_PRIVATE|MAP_ANONYMOUS creates a new anonymous mapping.
        // No file descriptor is used (-1). Return value is checked for MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error().into());
        }
        let ptr = ptr as *mut u8;

        // SAFETY: the mapping is at least code.len() bytes and freshly created.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }

        // Make executable (and read-only)
        let ret = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            unmap(ptr, len);
            return Err(err.into());
        }

        Ok(ExecutableBuffer { ptr, len })
    }

    #[cfg(not(unix))]
    fn new(_code: &[u8]) -> ConcatResult<Self> {
        Err(ConcatError::Unsupported(
            "executable memory is only mapped on unix hosts".into(),
        ))
    }
}

impl Drop for ExecutableBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() && self.len > 0 {
            unmap(self.ptr, self.len);
        }
    }
}

#[cfg(unix)]
fn unmap(ptr: *mut u8, len: usize) {
    unsafe {
        libc::munmap(ptr as *mut _, len);
    }
}

#[cfg(not(unix))]
fn unmap(_ptr: *mut u8, _len: usize) {}

#[cfg(unix)]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::planner::plan;
    use crate::types::{DType, TensorDesc};

    fn dummy_config() -> KernelConfig {
        let t = TensorDesc::nhwc(DType::F32, 1, 1, 1, 4);
        plan(&[t], &t, false).unwrap()
    }

    #[test]
    fn test_call_args_layout() {
        let ptr = std::mem::size_of::<*const u8>();
        assert_eq!(ConcatCallArgs::SRC_OFFSET, 0);
        assert_eq!(ConcatCallArgs::NB_IC_OFFSET, ptr);
        assert_eq!(ConcatCallArgs::DST_OFFSET, 2 * ptr);
    }

    #[test]
    fn test_empty_code_rejected() {
        assert!(CompiledConcat::from_code(&[], dummy_config()).is_err());
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    #[test]
    fn test_executable_buffer_alloc() {
        let code = [0xC3u8]; // ret
        let buf = ExecutableBuffer::new(&code).unwrap();
        assert!(!buf.ptr.is_null());
        assert_eq!(buf.len, page_size());
        unsafe {
            let f: extern "C" fn() = std::mem::transmute(buf.ptr);
            f();
        }
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    #[test]
    fn test_compiled_concat_ret_stub() {
        let cfg = dummy_config();
        let compiled = CompiledConcat::from_code(&[0xC3], cfg).unwrap();
        assert_eq!(compiled.config(), &cfg);
        let args = ConcatCallArgs {
            src: std::ptr::null(),
            nb_ic: std::ptr::null(),
            dst: std::ptr::null_mut(),
        };
        unsafe { compiled.call(&args) };
    }
}
