#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncCategory {
    Core,
    User,
    Tool,
    Fun,
    Admin,
}

impl FuncCategory {
    pub fn label(&self) -> &'static str {
        match self {
            FuncCategory::Core => "核心",
            FuncCategory::User => "用戶",
            FuncCategory::Tool => "工具",
            FuncCategory::Fun => "娛樂",
            FuncCategory::Admin => "管理",
        }
    }
}

/// 功能在群組中的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncStatus {
    Enabled,
    Disabled,
    Maintenance,
}

impl FuncStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            FuncStatus::Enabled => "🟢",
            FuncStatus::Disabled => "🔴",
            FuncStatus::Maintenance => "🛠️",
        }
    }
}

#[derive(Debug)]
pub struct FunctionInfo {
    /// 與斜線指令的根名稱相同
    pub id: &'static str,
    pub name: &'static str,
    pub category: FuncCategory,
    pub description: &'static str,
    pub usage: &'static [&'static str],
    pub can_be_disabled: bool,
    pub hidden: bool,
}

pub static FUNCTIONS: &[FunctionInfo] = &[
    FunctionInfo {
        id: "sign",
        name: "簽到",
        category: FuncCategory::User,
        description: "用戶簽到，遊戲幣唯一的憑空來源",
        usage: &["/sign"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "transfer",
        name: "轉帳",
        category: FuncCategory::User,
        description: "把自己的遊戲幣轉給其他用戶，每日轉出上限 200",
        usage: &["/transfer <用戶> <數量>", "/transfer <用戶> all:True"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "nickname",
        name: "暱稱",
        category: FuncCategory::User,
        description: "查看或設定自己的暱稱",
        usage: &["/nickname", "/nickname <新暱稱>"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "mydata",
        name: "個人資料",
        category: FuncCategory::User,
        description: "查看自己的簽到與遊戲幣資料",
        usage: &["/mydata"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "coinlog",
        name: "遊戲幣紀錄",
        category: FuncCategory::User,
        description: "查看自己最近的遊戲幣變動",
        usage: &["/coinlog"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "bottle",
        name: "漂流瓶",
        category: FuncCategory::Fun,
        description: "字面意思，就是漂流瓶",
        usage: &[
            "/bottle info",
            "/bottle drop <內容> [圖片] [anonymous] [remaining]",
            "/bottle get",
            "/bottle check [id]",
            "/bottle delete <id>",
            "/bottle score <id> <分數>",
            "/bottle discuss <id> <評論>",
        ],
        can_be_disabled: true,
        hidden: false,
    },
    FunctionInfo {
        id: "function",
        name: "功能開關",
        category: FuncCategory::Core,
        description: "查看、開啟或關閉本群的功能",
        usage: &["/function list", "/function enable <功能>", "/function disable <功能>"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "help",
        name: "幫助",
        category: FuncCategory::Core,
        description: "查看功能列表與用法",
        usage: &["/help", "/help <功能>"],
        can_be_disabled: false,
        hidden: false,
    },
    FunctionInfo {
        id: "owner",
        name: "所有者初始化",
        category: FuncCategory::Admin,
        description: "使用啟動時產生的驗證碼綁定機器人所有者",
        usage: &["/owner bind <驗證碼>"],
        can_be_disabled: false,
        hidden: true,
    },
    FunctionInfo {
        id: "admin",
        name: "管理",
        category: FuncCategory::Admin,
        description: "封禁、審核漂流瓶、日常維護與管理員名單",
        usage: &[
            "/admin ban <用戶> [原因]",
            "/admin unban <用戶>",
            "/admin group-ban <群組> [原因]",
            "/admin group-unban <群組>",
            "/admin review [id] [通過]",
            "/admin daily",
            "/admin add <AID>",
            "/admin remove <AID>",
            "/admin list",
        ],
        can_be_disabled: false,
        hidden: true,
    },
];

pub fn find_function(key: &str) -> Option<&'static FunctionInfo> {
    let key = key.trim();
    FUNCTIONS
        .iter()
        .find(|f| f.id.eq_ignore_ascii_case(key) || f.name == key)
}
