use crate::sunspec::{
    Expected::{Number, Text},
    RegisterSpec,
    RegisterType::*,
};

pub const OPERATING_STATES: &[(u16, &str)] = &[
    (1, "OFF"),
    (2, "SLEEPING"),
    (3, "STARTING"),
    (4, "MPPT"),
    (5, "THROTTLED"),
    (6, "SHUTTING_DOWN"),
    (7, "FAULT"),
    (8, "STANDBY"),
];

pub const DER_TYPES: &[(u16, &str)] = &[(4, "PV"), (82, "PV_STOR")];

pub const CHARGE_STATES: &[(u16, &str)] = &[
    (1, "OFF"),
    (2, "EMPTY"),
    (3, "DISCHARGING"),
    (4, "CHARGING"),
    (5, "FULL"),
    (6, "HOLDING"),
    (7, "TESTING"),
];

pub const CHARGE_SOURCES: &[(u16, &str)] = &[(0, "PV"), (1, "GRID")];

/// Fronius Symo GEN24 with BYD storage, unit 1. Addresses as printed in the
/// Fronius SunSpec tables (1-based).
pub const INVERTER: &[RegisterSpec] = &[
    // common
    RegisterSpec::new("SID", 40001, 40002, String).expect(Text("SunS")),
    RegisterSpec::new("ID (common)", 40003, 40003, Uint16).expect(Number(1.0)),
    RegisterSpec::new("L (common)", 40004, 40004, Uint16).expect(Number(65.0)),
    RegisterSpec::new("Mn", 40005, 40020, String).expect(Text("Fronius")),
    RegisterSpec::new("Md", 40021, 40036, String),
    RegisterSpec::new("Opt", 40037, 40044, String),
    RegisterSpec::new("Vr", 40045, 40052, String),
    RegisterSpec::new("SN", 40053, 40068, String),
    RegisterSpec::new("DA", 40069, 40069, Uint16).expect(Number(1.0)),

    // inverter (int + sf)
    RegisterSpec::new("ID (inverter)", 40070, 40070, Uint16).expect(Number(103.0)),
    RegisterSpec::new("L (inverter)", 40071, 40071, Uint16).expect(Number(50.0)),
    RegisterSpec::new("A", 40072, 40072, Uint16).scaled("A_SF"),
    RegisterSpec::new("AphA", 40073, 40073, Uint16).scaled("A_SF"),
    RegisterSpec::new("AphB", 40074, 40074, Uint16).scaled("A_SF"),
    RegisterSpec::new("AphC", 40075, 40075, Uint16).scaled("A_SF"),
    RegisterSpec::new("A_SF", 40076, 40076, ScaleFactor),
    RegisterSpec::new("PPVphAB", 40077, 40077, Uint16).scaled("V_SF"),
    RegisterSpec::new("PPVphBC", 40078, 40078, Uint16).scaled("V_SF"),
    RegisterSpec::new("PPVphCA", 40079, 40079, Uint16).scaled("V_SF"),
    RegisterSpec::new("PhVphA", 40080, 40080, Uint16).scaled("V_SF"),
    RegisterSpec::new("PhVphB", 40081, 40081, Uint16).scaled("V_SF"),
    RegisterSpec::new("PhVphC", 40082, 40082, Uint16).scaled("V_SF"),
    RegisterSpec::new("V_SF", 40083, 40083, ScaleFactor),
    RegisterSpec::new("W", 40084, 40084, Int16).scaled("W_SF"),
    RegisterSpec::new("W_SF", 40085, 40085, ScaleFactor),
    RegisterSpec::new("Hz", 40086, 40086, Uint16).scaled("Hz_SF"),
    RegisterSpec::new("Hz_SF", 40087, 40087, ScaleFactor),
    RegisterSpec::new("VA", 40088, 40088, Int16).scaled("VA_SF"),
    RegisterSpec::new("VA_SF", 40089, 40089, ScaleFactor),
    RegisterSpec::new("VAr", 40090, 40090, Int16).scaled("VAr_SF"),
    RegisterSpec::new("VAr_SF", 40091, 40091, ScaleFactor),
    RegisterSpec::new("PF", 40092, 40092, Int16).scaled("PF_SF"),
    RegisterSpec::new("PF_SF", 40093, 40093, ScaleFactor),
    RegisterSpec::new("WH", 40094, 40095, Accumulator32).scaled("WH_SF"),
    RegisterSpec::new("WH_SF", 40096, 40096, ScaleFactor),
    RegisterSpec::new("DCA", 40097, 40097, Uint16).scaled("DCA_SF (inverter)"),
    RegisterSpec::new("DCA_SF (inverter)", 40098, 40098, ScaleFactor),
    RegisterSpec::new("DCV", 40099, 40099, Uint16).scaled("DCV_SF (inverter)"),
    RegisterSpec::new("DCV_SF (inverter)", 40100, 40100, ScaleFactor),
    RegisterSpec::new("DCW", 40101, 40101, Int16).scaled("DCW_SF (inverter)"),
    RegisterSpec::new("DCW_SF (inverter)", 40102, 40102, ScaleFactor),
    RegisterSpec::new("TmpCab", 40103, 40103, Int16).scaled("Tmp_SF"),
    RegisterSpec::new("TmpSnk", 40104, 40104, Int16).scaled("Tmp_SF"),
    RegisterSpec::new("TmpTrns", 40105, 40105, Int16).scaled("Tmp_SF"),
    RegisterSpec::new("TmpOt", 40106, 40106, Int16).scaled("Tmp_SF"),
    RegisterSpec::new("Tmp_SF", 40107, 40107, ScaleFactor),
    RegisterSpec::new("St", 40108, 40108, Enum16).enums(OPERATING_STATES),
    RegisterSpec::new("StVnd", 40109, 40109, Uint16),
    RegisterSpec::new("Evt1", 40110, 40111, Bitfield32),
    RegisterSpec::new("Evt2", 40112, 40113, Bitfield32),

    // nameplate
    RegisterSpec::new("ID (nameplate)", 40122, 40122, Uint16).expect(Number(120.0)),
    RegisterSpec::new("L (nameplate)", 40123, 40123, Uint16).expect(Number(26.0)),
    RegisterSpec::new("DERTyp", 40124, 40124, Enum16).enums(DER_TYPES),
    RegisterSpec::new("WRtg", 40125, 40125, Uint16).scaled("WRtg_SF"),
    RegisterSpec::new("WRtg_SF", 40126, 40126, ScaleFactor),
    RegisterSpec::new("VARtg", 40127, 40127, Uint16).scaled("VARtg_SF"),
    RegisterSpec::new("VARtg_SF", 40128, 40128, ScaleFactor),
    RegisterSpec::new("ARtg", 40134, 40134, Uint16).scaled("ARtg_SF"),
    RegisterSpec::new("ARtg_SF", 40135, 40135, ScaleFactor),
    RegisterSpec::new("WHRtg", 40141, 40141, Uint16).scaled("WHRtg_SF"),
    RegisterSpec::new("WHRtg_SF", 40142, 40142, ScaleFactor),
    RegisterSpec::new("MaxChaRte", 40145, 40145, Uint16).scaled("MaxChaRte_SF"),
    RegisterSpec::new("MaxChaRte_SF", 40146, 40146, ScaleFactor),
    RegisterSpec::new("MaxDisChaRte", 40147, 40147, Uint16).scaled("MaxDisChaRte_SF"),
    RegisterSpec::new("MaxDisChaRte_SF", 40148, 40148, ScaleFactor),

    // multiple MPPT extension: 1/2 are the PV strings, 3/4 battery charge/discharge
    RegisterSpec::new("ID (mppt)", 40254, 40254, Uint16).expect(Number(160.0)),
    RegisterSpec::new("L (mppt)", 40255, 40255, Uint16).expect(Number(88.0)),
    RegisterSpec::new("DCA_SF", 40256, 40256, ScaleFactor),
    RegisterSpec::new("DCV_SF", 40257, 40257, ScaleFactor),
    RegisterSpec::new("DCW_SF", 40258, 40258, ScaleFactor),
    RegisterSpec::new("DCWH_SF", 40259, 40259, ScaleFactor),
    RegisterSpec::new("Evt", 40260, 40261, Bitfield32),
    RegisterSpec::new("N", 40262, 40262, Count),
    RegisterSpec::new("TmsPer", 40263, 40263, Uint16),
    RegisterSpec::new("1_ID", 40264, 40264, Uint16),
    RegisterSpec::new("1_IDStr", 40265, 40272, String),
    RegisterSpec::new("1_DCA", 40273, 40273, Uint16).scaled("DCA_SF"),
    RegisterSpec::new("1_DCV", 40274, 40274, Uint16).scaled("DCV_SF"),
    RegisterSpec::new("1_DCW", 40275, 40275, Uint16).scaled("DCW_SF"),
    RegisterSpec::new("1_DCWH", 40276, 40277, Accumulator32).scaled("DCWH_SF"),
    RegisterSpec::new("1_Tms", 40278, 40279, Accumulator32),
    RegisterSpec::new("1_Tmp", 40280, 40280, Int16),
    RegisterSpec::new("1_DCSt", 40281, 40281, Enum16).enums(OPERATING_STATES),
    RegisterSpec::new("1_DCEvt", 40282, 40283, Bitfield32),
    RegisterSpec::new("2_ID", 40284, 40284, Uint16),
    RegisterSpec::new("2_IDStr", 40285, 40292, String),
    RegisterSpec::new("2_DCA", 40293, 40293, Uint16).scaled("DCA_SF"),
    RegisterSpec::new("2_DCV", 40294, 40294, Uint16).scaled("DCV_SF"),
    RegisterSpec::new("2_DCW", 40295, 40295, Uint16).scaled("DCW_SF"),
    RegisterSpec::new("2_DCWH", 40296, 40297, Accumulator32).scaled("DCWH_SF"),
    RegisterSpec::new("2_Tms", 40298, 40299, Accumulator32),
    RegisterSpec::new("2_Tmp", 40300, 40300, Int16),
    RegisterSpec::new("2_DCSt", 40301, 40301, Enum16).enums(OPERATING_STATES),
    RegisterSpec::new("2_DCEvt", 40302, 40303, Bitfield32),
    RegisterSpec::new("3_ID", 40304, 40304, Uint16),
    RegisterSpec::new("3_IDStr", 40305, 40312, String),
    RegisterSpec::new("3_DCA", 40313, 40313, Uint16).scaled("DCA_SF"),
    RegisterSpec::new("3_DCV", 40314, 40314, Uint16).scaled("DCV_SF"),
    RegisterSpec::new("3_DCW", 40315, 40315, Uint16).scaled("DCW_SF"),
    RegisterSpec::new("3_DCWH", 40316, 40317, Accumulator32).scaled("DCWH_SF"),
    RegisterSpec::new("3_Tms", 40318, 40319, Accumulator32),
    RegisterSpec::new("3_Tmp", 40320, 40320, Int16),
    RegisterSpec::new("3_DCSt", 40321, 40321, Enum16).enums(OPERATING_STATES),
    RegisterSpec::new("3_DCEvt", 40322, 40323, Bitfield32),
    RegisterSpec::new("4_ID", 40324, 40324, Uint16),
    RegisterSpec::new("4_IDStr", 40325, 40332, String),
    RegisterSpec::new("4_DCA", 40333, 40333, Uint16).scaled("DCA_SF"),
    RegisterSpec::new("4_DCV", 40334, 40334, Uint16).scaled("DCV_SF"),
    RegisterSpec::new("4_DCW", 40335, 40335, Uint16).scaled("DCW_SF"),
    RegisterSpec::new("4_DCWH", 40336, 40337, Accumulator32).scaled("DCWH_SF"),
    RegisterSpec::new("4_Tms", 40338, 40339, Accumulator32),
    RegisterSpec::new("4_Tmp", 40340, 40340, Int16),
    RegisterSpec::new("4_DCSt", 40341, 40341, Enum16).enums(OPERATING_STATES),
    RegisterSpec::new("4_DCEvt", 40342, 40343, Bitfield32),

    // storage
    RegisterSpec::new("ID (storage)", 40344, 40344, Uint16).expect(Number(124.0)),
    RegisterSpec::new("L (storage)", 40345, 40345, Uint16).expect(Number(24.0)),
    RegisterSpec::new("WChaMax", 40346, 40346, Uint16).scaled("WChaMax_SF"),
    RegisterSpec::new("WChaGra", 40347, 40347, Uint16).scaled("WChaDisChaGra_SF"),
    RegisterSpec::new("WDisChaGra", 40348, 40348, Uint16).scaled("WChaDisChaGra_SF"),
    RegisterSpec::new("StorCtl_Mod", 40349, 40349, Bitfield16),
    RegisterSpec::new("VAChaMax", 40350, 40350, Uint16).scaled("VAChaMax_SF"),
    RegisterSpec::new("MinRsvPct", 40351, 40351, Uint16).scaled("MinRsvPct_SF"),
    RegisterSpec::new("ChaState", 40352, 40352, Uint16).scaled("ChaState_SF"),
    RegisterSpec::new("StorAval", 40353, 40353, Uint16).scaled("StorAval_SF"),
    RegisterSpec::new("InBatV", 40354, 40354, Uint16).scaled("InBatV_SF"),
    RegisterSpec::new("ChaSt", 40355, 40355, Enum16).enums(CHARGE_STATES),
    RegisterSpec::new("OutWRte", 40356, 40356, Int16).scaled("InOutWRte_SF"),
    RegisterSpec::new("InWRte", 40357, 40357, Int16).scaled("InOutWRte_SF"),
    RegisterSpec::new("InOutWRte_WinTms", 40358, 40358, Uint16),
    RegisterSpec::new("InOutWRte_RvrtTms", 40359, 40359, Uint16),
    RegisterSpec::new("InOutWRte_RmpTms", 40360, 40360, Uint16),
    RegisterSpec::new("ChaGriSet", 40361, 40361, Enum16).enums(CHARGE_SOURCES),
    RegisterSpec::new("WChaMax_SF", 40362, 40362, ScaleFactor),
    RegisterSpec::new("WChaDisChaGra_SF", 40363, 40363, ScaleFactor),
    RegisterSpec::new("VAChaMax_SF", 40364, 40364, ScaleFactor),
    RegisterSpec::new("MinRsvPct_SF", 40365, 40365, ScaleFactor),
    RegisterSpec::new("ChaState_SF", 40366, 40366, ScaleFactor),
    RegisterSpec::new("StorAval_SF", 40367, 40367, ScaleFactor),
    RegisterSpec::new("InBatV_SF", 40368, 40368, ScaleFactor),
    RegisterSpec::new("InOutWRte_SF", 40369, 40369, ScaleFactor),

    // end block
    RegisterSpec::new("ID (end block)", 40370, 40370, Uint16).expect(Number(65535.0)),
    RegisterSpec::new("L (end block)", 40371, 40371, Uint16).expect(Number(0.0)),
];

/// Fronius Smart Meter TS, unit 200, float model.
pub const SMART_METER: &[RegisterSpec] = &[
    // common
    RegisterSpec::new("SID", 40001, 40002, String).expect(Text("SunS")),
    RegisterSpec::new("ID (common)", 40003, 40003, Uint16).expect(Number(1.0)),
    RegisterSpec::new("L (common)", 40004, 40004, Uint16).expect(Number(65.0)),
    RegisterSpec::new("Mn", 40005, 40020, String).expect(Text("Fronius")),
    RegisterSpec::new("Md", 40021, 40036, String),
    RegisterSpec::new("Opt", 40037, 40044, String),
    RegisterSpec::new("Vr", 40045, 40052, String),
    RegisterSpec::new("SN", 40053, 40068, String),
    RegisterSpec::new("DA", 40069, 40069, Uint16).expect(Number(200.0)),

    // ac meter (float)
    RegisterSpec::new("ID (ac_meter)", 40070, 40070, Uint16).expect(Number(213.0)),
    RegisterSpec::new("L (ac_meter)", 40071, 40071, Uint16).expect(Number(124.0)),
    RegisterSpec::new("A", 40072, 40073, Float32),
    RegisterSpec::new("AphA", 40074, 40075, Float32),
    RegisterSpec::new("AphB", 40076, 40077, Float32),
    RegisterSpec::new("AphC", 40078, 40079, Float32),
    RegisterSpec::new("PhV", 40080, 40081, Float32),
    RegisterSpec::new("PhVphA", 40082, 40083, Float32),
    RegisterSpec::new("PhVphB", 40084, 40085, Float32),
    RegisterSpec::new("PhVphC", 40086, 40087, Float32),
    RegisterSpec::new("PPV", 40088, 40089, Float32),
    RegisterSpec::new("PPVphAB", 40090, 40091, Float32),
    RegisterSpec::new("PPVphBC", 40092, 40093, Float32),
    RegisterSpec::new("PPVphCA", 40094, 40095, Float32),
    RegisterSpec::new("Hz", 40096, 40097, Float32),
    RegisterSpec::new("W", 40098, 40099, Float32),
    RegisterSpec::new("WphA", 40100, 40101, Float32),
    RegisterSpec::new("WphB", 40102, 40103, Float32),
    RegisterSpec::new("WphC", 40104, 40105, Float32),
    RegisterSpec::new("VA", 40106, 40107, Float32),
    RegisterSpec::new("VAphA", 40108, 40109, Float32),
    RegisterSpec::new("VAphB", 40110, 40111, Float32),
    RegisterSpec::new("VAphC", 40112, 40113, Float32),
    RegisterSpec::new("VAR", 40114, 40115, Float32),
    RegisterSpec::new("VARphA", 40116, 40117, Float32),
    RegisterSpec::new("VARphB", 40118, 40119, Float32),
    RegisterSpec::new("VARphC", 40120, 40121, Float32),
    RegisterSpec::new("PF", 40122, 40123, Float32),
    RegisterSpec::new("PFphA", 40124, 40125, Float32),
    RegisterSpec::new("PFphB", 40126, 40127, Float32),
    RegisterSpec::new("PFphC", 40128, 40129, Float32),
    RegisterSpec::new("TotWhExp", 40130, 40131, Float32),
    RegisterSpec::new("TotWhExpPhA", 40132, 40133, Float32),
    RegisterSpec::new("TotWhExpPhB", 40134, 40135, Float32),
    RegisterSpec::new("TotWhExpPhC", 40136, 40137, Float32),
    RegisterSpec::new("TotWhImp", 40138, 40139, Float32),
    RegisterSpec::new("TotWhImpPhA", 40140, 40141, Float32),
    RegisterSpec::new("TotWhImpPhB", 40142, 40143, Float32),
    RegisterSpec::new("TotWhImpPhC", 40144, 40145, Float32),

    // end block
    RegisterSpec::new("ID (end block)", 40196, 40196, Uint16).expect(Number(65535.0)),
    RegisterSpec::new("L (end block)", 40197, 40197, Uint16).expect(Number(0.0)),
];
