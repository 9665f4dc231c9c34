//! H.264 parameter set assembly.
//!
//! Builds the SPS and PPS NAL units the stream prepends to every
//! keyframe. The values are fixed for low latency: Constrained Baseline,
//! one reference frame, and a VUI that forbids decoder-side reordering
//! (`max_num_reorder_frames=0`, `max_dec_frame_buffering=1`), which keeps
//! end-to-end latency at a single frame.

pub const PROFILE_BASELINE: u8 = 66;
pub const LEVEL_5_2: u8 = 52;

const NAL_SPS: u8 = 0x67;
const NAL_PPS: u8 = 0x68;

/// MSB-first bit writer with Exp-Golomb support.
pub struct BitWriter {
    bytes: Vec<u8>,
    bit: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(32),
            bit: 0,
        }
    }

    pub fn put_bit(&mut self, value: bool) {
        if self.bit == 0 {
            self.bytes.push(0);
        }
        if value {
            let last = self.bytes.last_mut().expect("pushed above");
            *last |= 1 << (7 - self.bit);
        }
        self.bit = (self.bit + 1) % 8;
    }

    pub fn put_bits(&mut self, value: u32, count: u8) {
        for shift in (0..count).rev() {
            self.put_bit(value >> shift & 1 == 1);
        }
    }

    /// Unsigned Exp-Golomb.
    pub fn put_ue(&mut self, value: u32) {
        let coded = value as u64 + 1;
        let bits = 64 - coded.leading_zeros() as u8;
        for _ in 0..bits - 1 {
            self.put_bit(false);
        }
        for shift in (0..bits).rev() {
            self.put_bit(coded >> shift & 1 == 1);
        }
    }

    /// Signed Exp-Golomb.
    pub fn put_se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            (-value as u32) * 2
        };
        self.put_ue(mapped);
    }

    /// rbsp_trailing_bits: a stop bit then zero-fill to a byte boundary.
    pub fn finish(mut self) -> Vec<u8> {
        self.put_bit(true);
        while self.bit != 0 {
            self.put_bit(false);
        }
        self.bytes
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Inserts emulation-prevention bytes: any `00 00 0x` with x <= 3 in the
/// RBSP becomes `00 00 03 0x` on the wire.
pub fn rbsp_to_ebsp(rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + 4);
    let mut zeros = 0u8;
    for &byte in rbsp {
        if zeros >= 2 && byte <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Strips emulation-prevention bytes again; used by consumers that need
/// to parse parameter sets.
pub fn ebsp_to_rbsp(ebsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ebsp.len());
    let mut zeros = 0u8;
    for &byte in ebsp {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

/// Sequence parameter set for the given coded size. `display` dimensions
/// drive the cropping window when they fall short of the 16-aligned coded
/// size. Returns the complete NAL unit without a start code.
pub fn build_sps(coded_width: u32, coded_height: u32, display_width: u32, display_height: u32) -> Vec<u8> {
    debug_assert_eq!(coded_width % 16, 0);
    debug_assert_eq!(coded_height % 16, 0);

    let mut bits = BitWriter::new();
    bits.put_bits(PROFILE_BASELINE as u32, 8);
    // constraint_set0..5 then two reserved zero bits.
    bits.put_bit(true);
    bits.put_bit(true);
    bits.put_bits(0, 4);
    bits.put_bits(0, 2);
    bits.put_bits(LEVEL_5_2 as u32, 8);
    bits.put_ue(0); // seq_parameter_set_id
    bits.put_ue(0); // log2_max_frame_num_minus4
    bits.put_ue(0); // pic_order_cnt_type
    bits.put_ue(4); // log2_max_pic_order_cnt_lsb_minus4
    bits.put_ue(1); // max_num_ref_frames
    bits.put_bit(false); // gaps_in_frame_num_value_allowed_flag
    bits.put_ue(coded_width / 16 - 1); // pic_width_in_mbs_minus1
    bits.put_ue(coded_height / 16 - 1); // pic_height_in_map_units_minus1
    bits.put_bit(true); // frame_mbs_only_flag
    bits.put_bit(true); // direct_8x8_inference_flag

    let crop_right = (coded_width - display_width.min(coded_width)) / 2;
    let crop_bottom = (coded_height - display_height.min(coded_height)) / 2;
    if crop_right > 0 || crop_bottom > 0 {
        bits.put_bit(true); // frame_cropping_flag
        bits.put_ue(0);
        bits.put_ue(crop_right);
        bits.put_ue(0);
        bits.put_ue(crop_bottom);
    } else {
        bits.put_bit(false);
    }

    bits.put_bit(true); // vui_parameters_present_flag
    bits.put_bit(false); // aspect_ratio_info_present_flag
    bits.put_bit(false); // overscan_info_present_flag
    bits.put_bit(true); // video_signal_type_present_flag
    bits.put_bits(5, 3); // video_format: unspecified
    bits.put_bit(true); // video_full_range_flag
    bits.put_bit(true); // colour_description_present_flag
    bits.put_bits(1, 8); // colour_primaries: BT.709
    bits.put_bits(1, 8); // transfer_characteristics: BT.709
    bits.put_bits(1, 8); // matrix_coefficients: BT.709
    bits.put_bit(false); // chroma_loc_info_present_flag
    bits.put_bit(false); // timing_info_present_flag
    bits.put_bit(false); // nal_hrd_parameters_present_flag
    bits.put_bit(false); // vcl_hrd_parameters_present_flag
    bits.put_bit(false); // pic_struct_present_flag
    bits.put_bit(true); // bitstream_restriction_flag
    bits.put_bit(true); // motion_vectors_over_pic_boundaries_flag
    bits.put_ue(0); // max_bytes_per_pic_denom
    bits.put_ue(0); // max_bits_per_mb_denom
    bits.put_ue(16); // log2_max_mv_length_horizontal
    bits.put_ue(16); // log2_max_mv_length_vertical
    bits.put_ue(0); // max_num_reorder_frames
    bits.put_ue(1); // max_dec_frame_buffering

    let mut nal = vec![NAL_SPS];
    nal.extend_from_slice(&rbsp_to_ebsp(&bits.finish()));
    nal
}

/// Picture parameter set: CAVLC, deblocking control present. Returns the
/// complete NAL unit without a start code.
pub fn build_pps() -> Vec<u8> {
    let mut bits = BitWriter::new();
    bits.put_ue(0); // pic_parameter_set_id
    bits.put_ue(0); // seq_parameter_set_id
    bits.put_bit(false); // entropy_coding_mode_flag: CAVLC
    bits.put_bit(false); // bottom_field_pic_order_in_frame_present_flag
    bits.put_ue(0); // num_slice_groups_minus1
    bits.put_ue(0); // num_ref_idx_l0_default_active_minus1
    bits.put_ue(0); // num_ref_idx_l1_default_active_minus1
    bits.put_bit(false); // weighted_pred_flag
    bits.put_bits(0, 2); // weighted_bipred_idc
    bits.put_se(-6); // pic_init_qp_minus26
    bits.put_se(0); // pic_init_qs_minus26
    bits.put_se(0); // chroma_qp_index_offset
    bits.put_bit(true); // deblocking_filter_control_present_flag
    bits.put_bit(false); // constrained_intra_pred_flag
    bits.put_bit(false); // redundant_pic_cnt_present_flag

    let mut nal = vec![NAL_PPS];
    nal.extend_from_slice(&rbsp_to_ebsp(&bits.finish()));
    nal
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counterpart reader used to decode what the writer emitted.
    struct BitReader<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl<'a> BitReader<'a> {
        fn new(bytes: &'a [u8]) -> Self {
            Self { bytes, pos: 0 }
        }

        fn bit(&mut self) -> u32 {
            let byte = self.bytes[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            self.pos += 1;
            bit as u32
        }

        fn bits(&mut self, count: u8) -> u32 {
            let mut value = 0;
            for _ in 0..count {
                value = value << 1 | self.bit();
            }
            value
        }

        fn ue(&mut self) -> u32 {
            let mut zeros = 0;
            while self.bit() == 0 {
                zeros += 1;
            }
            let mut value = 1u32;
            for _ in 0..zeros {
                value = value << 1 | self.bit();
            }
            value - 1
        }

        fn se(&mut self) -> i32 {
            let coded = self.ue();
            if coded % 2 == 1 {
                (coded / 2 + 1) as i32
            } else {
                -((coded / 2) as i32)
            }
        }
    }

    #[test]
    fn exp_golomb_round_trips() {
        let mut writer = BitWriter::new();
        for value in [0u32, 1, 2, 3, 7, 8, 254, 255, 256, 65_535] {
            writer.put_ue(value);
        }
        for value in [0i32, 1, -1, 2, -2, 63, -64] {
            writer.put_se(value);
        }
        let bytes = writer.finish();
        let mut reader = BitReader::new(&bytes);
        for value in [0u32, 1, 2, 3, 7, 8, 254, 255, 256, 65_535] {
            assert_eq!(reader.ue(), value);
        }
        for value in [0i32, 1, -1, 2, -2, 63, -64] {
            assert_eq!(reader.se(), value);
        }
    }

    #[test]
    fn emulation_prevention_round_trips() {
        let rbsp = vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0xFF, 0x00, 0x00];
        let ebsp = rbsp_to_ebsp(&rbsp);
        assert!(!ebsp
            .windows(3)
            .any(|w| w[0] == 0 && w[1] == 0 && w[2] <= 0x01));
        assert_eq!(ebsp_to_rbsp(&ebsp), rbsp);
    }

    #[test]
    fn sps_fields_decode_to_the_contract() {
        let nal = build_sps(1_280, 720, 1_280, 720);
        assert_eq!(nal[0], 0x67);
        let rbsp = ebsp_to_rbsp(&nal[1..]);
        let mut reader = BitReader::new(&rbsp);

        assert_eq!(reader.bits(8), PROFILE_BASELINE as u32);
        assert_eq!(reader.bit(), 1, "constraint_set0");
        assert_eq!(reader.bit(), 1, "constraint_set1");
        assert_eq!(reader.bits(4), 0, "constraint_set2..5");
        assert_eq!(reader.bits(2), 0, "reserved");
        assert_eq!(reader.bits(8), LEVEL_5_2 as u32);
        assert_eq!(reader.ue(), 0, "sps id");
        assert_eq!(reader.ue(), 0, "log2_max_frame_num_minus4");
        assert_eq!(reader.ue(), 0, "pic_order_cnt_type");
        let _log2_max_poc = reader.ue();
        assert_eq!(reader.ue(), 1, "max_num_ref_frames");
        assert_eq!(reader.bit(), 0, "gaps_in_frame_num");
        assert_eq!(reader.ue(), 1_280 / 16 - 1, "width in mbs");
        assert_eq!(reader.ue(), 720 / 16 - 1, "height in map units");
        assert_eq!(reader.bit(), 1, "frame_mbs_only");
        assert_eq!(reader.bit(), 1, "direct_8x8_inference");
        assert_eq!(reader.bit(), 0, "no cropping at aligned size");

        assert_eq!(reader.bit(), 1, "vui present");
        assert_eq!(reader.bit(), 0, "aspect ratio");
        assert_eq!(reader.bit(), 0, "overscan");
        assert_eq!(reader.bit(), 1, "video signal type");
        assert_eq!(reader.bits(3), 5, "video_format");
        assert_eq!(reader.bit(), 1, "full range");
        assert_eq!(reader.bit(), 1, "colour description");
        assert_eq!(reader.bits(8), 1, "primaries bt.709");
        assert_eq!(reader.bits(8), 1, "transfer bt.709");
        assert_eq!(reader.bits(8), 1, "matrix bt.709");
        assert_eq!(reader.bit(), 0, "chroma loc");
        assert_eq!(reader.bit(), 0, "timing info");
        assert_eq!(reader.bit(), 0, "nal hrd");
        assert_eq!(reader.bit(), 0, "vcl hrd");
        assert_eq!(reader.bit(), 0, "pic struct");
        assert_eq!(reader.bit(), 1, "bitstream restriction");
        assert_eq!(reader.bit(), 1, "mv over boundaries");
        let _max_bytes = reader.ue();
        let _max_bits = reader.ue();
        let _mv_h = reader.ue();
        let _mv_v = reader.ue();
        assert_eq!(reader.ue(), 0, "max_num_reorder_frames");
        assert_eq!(reader.ue(), 1, "max_dec_frame_buffering");
    }

    #[test]
    fn sps_crops_unaligned_display_sizes() {
        // 1000x700 source rounds up to 1008x704 coded.
        let nal = build_sps(1_008, 704, 1_000, 700);
        let rbsp = ebsp_to_rbsp(&nal[1..]);
        let mut reader = BitReader::new(&rbsp);
        reader.bits(8);
        reader.bits(8);
        reader.bits(8);
        for _ in 0..3 {
            reader.ue();
        }
        reader.ue();
        reader.ue();
        reader.bit();
        assert_eq!(reader.ue(), 1_008 / 16 - 1);
        assert_eq!(reader.ue(), 704 / 16 - 1);
        reader.bit();
        reader.bit();
        assert_eq!(reader.bit(), 1, "cropping flag");
        assert_eq!(reader.ue(), 0, "crop left");
        assert_eq!(reader.ue(), 4, "crop right: (1008-1000)/2");
        assert_eq!(reader.ue(), 0, "crop top");
        assert_eq!(reader.ue(), 2, "crop bottom: (704-700)/2");
    }

    #[test]
    fn pps_fields_decode_to_the_contract() {
        let nal = build_pps();
        assert_eq!(nal[0], 0x68);
        let rbsp = ebsp_to_rbsp(&nal[1..]);
        let mut reader = BitReader::new(&rbsp);
        assert_eq!(reader.ue(), 0, "pps id");
        assert_eq!(reader.ue(), 0, "sps id");
        assert_eq!(reader.bit(), 0, "cavlc");
        assert_eq!(reader.bit(), 0, "bottom field poc");
        assert_eq!(reader.ue(), 0, "slice groups");
        assert_eq!(reader.ue(), 0, "ref idx l0");
        assert_eq!(reader.ue(), 0, "ref idx l1");
        assert_eq!(reader.bit(), 0, "weighted pred");
        assert_eq!(reader.bits(2), 0, "weighted bipred");
        assert_eq!(reader.se(), -6, "pic_init_qp_minus26");
        assert_eq!(reader.se(), 0, "pic_init_qs_minus26");
        assert_eq!(reader.se(), 0, "chroma qp offset");
        assert_eq!(reader.bit(), 1, "deblocking control present");
        assert_eq!(reader.bit(), 0, "constrained intra pred");
        assert_eq!(reader.bit(), 0, "redundant pic cnt");
    }
}
