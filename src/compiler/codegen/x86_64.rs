//! x86_64 concat kernel generation via iced-x86 CodeAssembler.
//!
//! Emitted routine (System V, one pointer argument in `rdi`, no return value):
//!
//! ```text
//! prologue
//! rsi = args.src, rdx = args.nb_ic, r8 = args.dst
//! zero vreg 0 (all three width tiers)
//! for i in 0..n_inputs:                 ; r9d, bound baked in as imm32
//!     eax = *rdx, rcx = *rsi
//!     if eax > 0:
//!         do { load v1,[rcx]; [max v1,zero]; store [r8],v1
//!              rcx += stride; r8 += stride } while --eax > 0
//!     rsi += 8; rdx += 4
//! vzeroupper; epilogue
//! ```
//!
//! Register use is a fixed working set of caller-saved registers, so no
//! callee-saved state needs spilling.

use iced_x86::code_asm::*;
use iced_x86::IcedError;

use super::isel::{self, ClampOp, InstrSelection, VecWidth};
use super::{CodegenOutput, ConcatCodegen};
use crate::compiler::executable::ConcatCallArgs;
use crate::compiler::planner::KernelConfig;
use crate::dispatch::IsaLevel;
use crate::types::{ConcatError, ConcatResult};

impl From<IcedError> for ConcatError {
    fn from(e: IcedError) -> Self {
        ConcatError::Compile(e.to_string())
    }
}

// Fixed register assignment.
const REG_PARAM: AsmRegister64 = rdi;
const REG_PTR_SRC: AsmRegister64 = rsi;
const REG_PTR_NB_IC: AsmRegister64 = rdx;
const REG_PTR_DST: AsmRegister64 = r8;
const REG_NINPUTS: AsmRegister32 = r9d;
const REG_NB: AsmRegister32 = eax;
const REG_PTR_SRC_I: AsmRegister64 = rcx;

/// Code generator for AVX2 / AVX-512 hosts.
pub struct X86_64Codegen {
    isa: IsaLevel,
}

impl X86_64Codegen {
    pub fn new(isa: IsaLevel) -> Self {
        X86_64Codegen { isa }
    }
}

impl ConcatCodegen for X86_64Codegen {
    fn generate(&self, config: &KernelConfig) -> ConcatResult<CodegenOutput> {
        let sel = isel::select(config.bits_size, config.dtype, config.with_relu);
        if sel.required_isa() > self.isa {
            return Err(ConcatError::Unsupported(format!(
                "{}-bit concat needs {:?}, codegen targets {:?}",
                config.bits_size,
                sel.required_isa(),
                self.isa
            )));
        }

        let mut k = ConcatKernelAsm::new(config, sel)?;
        k.generate()?;
        let code = k.asm.assemble(0)?;

        log::debug!(
            "concat codegen: {} bytes for {:?} block={} bits={} inputs={} relu={}",
            code.len(),
            config.dtype,
            config.block,
            config.bits_size,
            config.n_inputs,
            config.with_relu
        );
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("concat kernel disassembly:\n{}", disassemble(&code));
        }

        Ok(CodegenOutput { code })
    }

    fn isa_level(&self) -> IsaLevel {
        self.isa
    }
}

/// Assembler state for one concat routine.
struct ConcatKernelAsm<'a> {
    asm: CodeAssembler,
    jcp: &'a KernelConfig,
    sel: InstrSelection,
}

impl<'a> ConcatKernelAsm<'a> {
    fn new(jcp: &'a KernelConfig, sel: InstrSelection) -> ConcatResult<Self> {
        Ok(ConcatKernelAsm {
            asm: CodeAssembler::new(64)?,
            jcp,
            sel,
        })
    }

    fn generate(&mut self) -> ConcatResult<()> {
        self.asm.push(rbp)?;
        self.asm.mov(rbp, rsp)?;

        self.asm
            .mov(REG_PTR_SRC, qword_ptr(REG_PARAM + ConcatCallArgs::SRC_OFFSET as i32))?;
        self.asm
            .mov(REG_PTR_NB_IC, qword_ptr(REG_PARAM + ConcatCallArgs::NB_IC_OFFSET as i32))?;
        self.asm
            .mov(REG_PTR_DST, qword_ptr(REG_PARAM + ConcatCallArgs::DST_OFFSET as i32))?;

        // VEX-encoded xor clears the full register, so xmm0/ymm0/zmm0 all read as zero.
        self.asm.vpxor(xmm0, xmm0, xmm0)?;

        // Bound is validated to fit i32 by the planner.
        let n_inputs = self.jcp.n_inputs as i32;
        if n_inputs > 0 {
            let mut l_next_input = self.asm.create_label();
            self.asm.xor(REG_NINPUTS, REG_NINPUTS)?;
            self.asm.set_label(&mut l_next_input)?;
            self.compute_one_input()?;
            self.asm.add(REG_PTR_SRC, std::mem::size_of::<*const u8>() as i32)?;
            self.asm.add(REG_PTR_NB_IC, std::mem::size_of::<i32>() as i32)?;
            self.asm.inc(REG_NINPUTS)?;
            self.asm.cmp(REG_NINPUTS, n_inputs)?;
            self.asm.jl(l_next_input)?;
        }

        self.asm.vzeroupper()?;
        self.asm.pop(rbp)?;
        self.asm.ret()?;
        Ok(())
    }

    fn compute_one_input(&mut self) -> ConcatResult<()> {
        let shift = self.jcp.block_bytes() as i32;
        let mut l_next_block = self.asm.create_label();
        let mut l_done = self.asm.create_label();

        self.asm.mov(REG_NB, dword_ptr(REG_PTR_NB_IC))?;
        self.asm.mov(REG_PTR_SRC_I, qword_ptr(REG_PTR_SRC))?;
        // Inputs contributing zero blocks are skipped.
        self.asm.cmp(REG_NB, 0i32)?;
        self.asm.jle(l_done)?;

        self.asm.set_label(&mut l_next_block)?;
        self.load_src()?;
        if let Some(op) = self.sel.clamp {
            self.clamp_src(op)?;
        }
        self.store_dst()?;
        self.asm.add(REG_PTR_SRC_I, shift)?;
        self.asm.add(REG_PTR_DST, shift)?;
        self.asm.dec(REG_NB)?;
        self.asm.jg(l_next_block)?;

        self.asm.set_label(&mut l_done)?;
        Ok(())
    }

    fn load_src(&mut self) -> ConcatResult<()> {
        match self.sel.width {
            VecWidth::Xmm => self.asm.vmovups(xmm1, xmmword_ptr(REG_PTR_SRC_I))?,
            VecWidth::Ymm => self.asm.vmovups(ymm1, ymmword_ptr(REG_PTR_SRC_I))?,
            VecWidth::Zmm => self.asm.vmovups(zmm1, zmmword_ptr(REG_PTR_SRC_I))?,
        }
        Ok(())
    }

    fn clamp_src(&mut self, op: ClampOp) -> ConcatResult<()> {
        match (self.sel.width, op) {
            (VecWidth::Xmm, ClampOp::MaxI32) => self.asm.vpmaxsd(xmm1, xmm1, xmm0)?,
            (VecWidth::Xmm, ClampOp::MaxF32) => self.asm.vmaxps(xmm1, xmm0, xmm1)?,
            (VecWidth::Xmm, ClampOp::MaxI8) => self.asm.vpmaxsb(xmm1, xmm1, xmm0)?,
            (VecWidth::Ymm, ClampOp::MaxI32) => self.asm.vpmaxsd(ymm1, ymm1, ymm0)?,
            (VecWidth::Ymm, ClampOp::MaxF32) => self.asm.vmaxps(ymm1, ymm0, ymm1)?,
            (VecWidth::Ymm, ClampOp::MaxI8) => self.asm.vpmaxsb(ymm1, ymm1, ymm0)?,
            (VecWidth::Zmm, ClampOp::MaxI32) => self.asm.vpmaxsd(zmm1, zmm1, zmm0)?,
            (VecWidth::Zmm, ClampOp::MaxF32) => self.asm.vmaxps(zmm1, zmm0, zmm1)?,
            (VecWidth::Zmm, ClampOp::MaxI8) => self.asm.vpmaxsb(zmm1, zmm1, zmm0)?,
        }
        Ok(())
    }

    fn store_dst(&mut self) -> ConcatResult<()> {
        match self.sel.width {
            VecWidth::Xmm => self.asm.vmovups(xmmword_ptr(REG_PTR_DST), xmm1)?,
            VecWidth::Ymm => self.asm.vmovups(ymmword_ptr(REG_PTR_DST), ymm1)?,
            VecWidth::Zmm => self.asm.vmovups(zmmword_ptr(REG_PTR_DST), zmm1)?,
        }
        Ok(())
    }
}

/// Intel-syntax listing of generated code, one instruction per line.
pub fn disassemble(code: &[u8]) -> String {
    use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};

    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    let mut instr = Instruction::default();
    let mut text = String::new();
    let mut out = String::new();
    while decoder.can_decode() {
        decoder.decode_out(&mut instr);
        text.clear();
        formatter.format(&instr, &mut text);
        out.push_str(&format!("{:04x}  {}\n", instr.ip(), text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::planner::plan;
    use crate::types::{DType, TensorDesc};
    use iced_x86::{Decoder, DecoderOptions, Instruction, Mnemonic};

    fn config(dtype: DType, channels: &[usize], relu: bool) -> KernelConfig {
        let srcs: Vec<_> = channels
            .iter()
            .map(|&c| TensorDesc::nhwc(dtype, 1, 1, 1, c))
            .collect();
        let dst = TensorDesc::nhwc(dtype, 1, 1, 1, channels.iter().sum());
        plan(&srcs, &dst, relu).unwrap()
    }

    fn mnemonics(code: &[u8]) -> Vec<Mnemonic> {
        let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
        let mut out = Vec::new();
        let mut instr = Instruction::default();
        while decoder.can_decode() {
            decoder.decode_out(&mut instr);
            assert!(!instr.is_invalid(), "undecodable byte at {:#x}", instr.ip());
            out.push(instr.mnemonic());
        }
        out
    }

    fn generate(cfg: &KernelConfig) -> Vec<u8> {
        X86_64Codegen::new(IsaLevel::Avx512).generate(cfg).unwrap().code
    }

    #[test]
    fn test_f32_relu_selects_vmaxps() {
        let code = generate(&config(DType::F32, &[8, 4], true));
        let m = mnemonics(&code);
        assert!(m.contains(&Mnemonic::Vmaxps));
        assert_eq!(m.iter().filter(|&&x| x == Mnemonic::Vmovups).count(), 2);
        assert_eq!(m.last(), Some(&Mnemonic::Ret));
    }

    #[test]
    fn test_s32_relu_selects_dword_max() {
        let m = mnemonics(&generate(&config(DType::S32, &[16], true)));
        assert!(m.contains(&Mnemonic::Vpmaxsd));
        assert!(!m.contains(&Mnemonic::Vpmaxsw));
    }

    #[test]
    fn test_u8_relu_keeps_signed_byte_max() {
        let m = mnemonics(&generate(&config(DType::U8, &[64], true)));
        assert!(m.contains(&Mnemonic::Vpmaxsb));
    }

    #[test]
    fn test_no_relu_has_no_max() {
        let m = mnemonics(&generate(&config(DType::F32, &[16, 16], false)));
        assert!(!m.contains(&Mnemonic::Vmaxps));
        assert!(m.contains(&Mnemonic::Vpxor));
        assert!(m.contains(&Mnemonic::Jg));
        assert!(m.contains(&Mnemonic::Jl));
    }

    #[test]
    fn test_zero_inputs_has_no_loop() {
        let dst = TensorDesc::nhwc(DType::F32, 1, 1, 1, 0);
        let cfg = plan(&[], &dst, false).unwrap();
        let m = mnemonics(&generate(&cfg));
        assert!(!m.contains(&Mnemonic::Jl));
        assert!(!m.contains(&Mnemonic::Vmovups));
        assert_eq!(m.last(), Some(&Mnemonic::Ret));
    }

    #[test]
    fn test_zmm_rejected_for_avx2_target() {
        let cfg = config(DType::F32, &[16], false);
        assert_eq!(cfg.bits_size, 512);
        let res = X86_64Codegen::new(IsaLevel::Avx2).generate(&cfg);
        assert!(matches!(res, Err(ConcatError::Unsupported(_))));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let cfg = config(DType::S8, &[32, 96], true);
        assert_eq!(generate(&cfg), generate(&cfg));
    }

    #[test]
    fn test_disassemble_lists_every_instruction() {
        let code = generate(&config(DType::F32, &[4], false));
        let listing = disassemble(&code);
        assert_eq!(listing.lines().count(), mnemonics(&code).len());
        assert!(listing.contains("vmovups"));
    }
}
